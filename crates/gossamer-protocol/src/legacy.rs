//! Legacy `TAG=payload` line format.
//!
//! Older peers publish frames such as `GROUP=['tcp://a:1', 'tcp://b:2']`,
//! `JOINED=True` and `JSON={...}` where the JSON document carries a float
//! `time`, a `priority` address and a `;`-separated `todo` list. Decoding
//! turns them into envelopes; encoding produces them again for peers that
//! only understand this format. Addresses containing `,`, `[`, `]`, `'`
//! or spaces cannot survive this format.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::constants::PROTOCOL_VERSION;
use crate::messages::{Envelope, GroupAnnouncement, JoinReport, MessageTag, TaskMessage};
use crate::types::{Address, Task, TaskStatus};
use crate::ProtocolError;

const STRIPPED_LIST_CHARS: [char; 4] = ['[', ']', '\'', ' '];

/// Split `TAG=payload` at the first `=`. Tags must be non-empty and made
/// of upper-case letters, digits or `_`.
pub fn split_legacy_frame(frame: &str) -> Option<(&str, &str)> {
    let (tag, payload) = frame.split_once('=')?;
    let valid = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    valid.then_some((tag, payload))
}

/// Parse a stringified peer list by stripping `[]' ` and splitting on `,`.
pub fn parse_legacy_peer_list(payload: &str) -> Vec<Address> {
    payload
        .chars()
        .filter(|c| !STRIPPED_LIST_CHARS.contains(c))
        .collect::<String>()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(Address::new)
        .collect()
}

/// Render a peer list the way the legacy format prints it.
pub fn format_legacy_peer_list(peers: &[Address]) -> String {
    let quoted: Vec<String> = peers.iter().map(|p| format!("'{p}'")).collect();
    format!("[{}]", quoted.join(", "))
}

fn parse_legacy_bool(payload: &str) -> Result<bool, ProtocolError> {
    match payload.trim() {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => Err(ProtocolError::Payload {
            tag: MessageTag::Joined.as_str().into(),
            reason: format!("expected True/False, got '{other}'"),
        }),
    }
}

fn timestamp_from_secs(secs: f64) -> Result<DateTime<Utc>, ProtocolError> {
    if !secs.is_finite() {
        return Err(ProtocolError::Decode(format!("invalid task time {secs}")));
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    let whole = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(whole, nanos)
        .ok_or_else(|| ProtocolError::Decode(format!("task time {secs} out of range")))
}

fn timestamp_to_secs(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

fn optional_address(value: Option<&Value>) -> Option<Address> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(Address::new(s.clone())),
        _ => None,
    }
}

/// Convert a legacy task document into a [`Task`].
///
/// Unknown keys are kept in the task payload.
pub fn task_from_legacy(document: Value) -> Result<Task, ProtocolError> {
    let Value::Object(mut map) = document else {
        return Err(ProtocolError::Payload {
            tag: MessageTag::Json.as_str().into(),
            reason: "task document is not an object".into(),
        });
    };

    let sender = optional_address(map.get("sender")).ok_or_else(|| ProtocolError::Payload {
        tag: MessageTag::Json.as_str().into(),
        reason: "missing sender".into(),
    })?;
    let priority_owner = optional_address(map.get("priority"));

    // Older workloads stamped the time under the tag name itself.
    let time = match map.get("time").or_else(|| map.get("JSON")) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ProtocolError::Payload {
        tag: MessageTag::Json.as_str().into(),
        reason: "missing or invalid time".into(),
    })?;

    let status = match map.get("status") {
        Some(Value::String(s)) if s == "complete" => TaskStatus::Complete,
        _ => TaskStatus::Pending,
    };

    let abilities = match map.get("todo") {
        Some(Value::String(s)) => s
            .split(';')
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let results = match map.get("results") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let completed_by = optional_address(map.get("completed_by"));

    for key in [
        "sender", "priority", "time", "JSON", "status", "todo", "results", "completed_by",
    ] {
        map.remove(key);
    }
    let payload = if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    };

    let mut task = Task::with_timestamp(
        sender,
        priority_owner,
        abilities,
        payload,
        timestamp_from_secs(time)?,
    );
    task.status = status;
    task.results = results;
    task.completed_by = completed_by;
    Ok(task)
}

/// Convert a [`Task`] into the legacy task document.
pub fn task_to_legacy(task: &Task) -> Value {
    let mut map = match &task.payload {
        Value::Object(fields) => fields.clone(),
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("payload".into(), other.clone());
            m
        }
    };
    map.insert("sender".into(), Value::String(task.sender.to_string()));
    map.insert(
        "priority".into(),
        task.priority_owner
            .as_ref()
            .map(|p| Value::String(p.to_string()))
            .unwrap_or(Value::Null),
    );
    map.insert(
        "todo".into(),
        if task.abilities.is_empty() {
            Value::Null
        } else {
            Value::String(task.abilities.join(";"))
        },
    );
    map.insert("status".into(), Value::String(task.status.to_string()));
    map.insert("time".into(), Value::from(timestamp_to_secs(&task.created_at)));
    map.insert(
        "results".into(),
        task.results.clone().map(Value::String).unwrap_or(Value::Null),
    );
    if let Some(by) = &task.completed_by {
        map.insert("completed_by".into(), Value::String(by.to_string()));
    }
    Value::Object(map)
}

fn legacy_envelope(tag: &str, payload: Value) -> Envelope {
    Envelope {
        version: PROTOCOL_VERSION,
        id: None,
        sender: None,
        tag: tag.to_string(),
        payload,
    }
}

fn to_value<T: serde::Serialize>(tag: &str, payload: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|e| ProtocolError::Encode(format!("{tag}: {e}")))
}

/// Decode a `TAG=payload` frame into an envelope.
///
/// Known tags get typed payloads; unknown tags carry their raw payload as
/// a JSON string so the dispatcher can still route (or ignore) them.
pub fn decode_legacy_frame(frame: &str) -> Result<Envelope, ProtocolError> {
    let (tag, raw) = split_legacy_frame(frame)
        .ok_or_else(|| ProtocolError::Decode(format!("not a TAG=payload frame: '{frame}'")))?;

    let payload = match MessageTag::from_str(tag) {
        Some(MessageTag::Group) => to_value(
            tag,
            &GroupAnnouncement {
                peers: parse_legacy_peer_list(raw),
            },
        )?,
        Some(MessageTag::Joined) => to_value(
            tag,
            &JoinReport {
                novel: parse_legacy_bool(raw)?,
            },
        )?,
        Some(MessageTag::Json) => {
            let document: Value = serde_json::from_str(raw)?;
            to_value(
                tag,
                &TaskMessage {
                    task: task_from_legacy(document)?,
                },
            )?
        }
        None => Value::String(raw.to_string()),
    };

    Ok(legacy_envelope(tag, payload))
}

/// Encode an envelope as a `TAG=payload` frame.
pub fn encode_legacy_frame(envelope: &Envelope) -> Result<String, ProtocolError> {
    let tag = envelope.tag.as_str();
    let body = match envelope.message_tag() {
        Some(MessageTag::Group) => {
            let group: GroupAnnouncement = envelope.decode_payload()?;
            format_legacy_peer_list(&group.peers)
        }
        Some(MessageTag::Joined) => {
            let report: JoinReport = envelope.decode_payload()?;
            let literal = if report.novel { "True" } else { "False" };
            literal.to_string()
        }
        Some(MessageTag::Json) => {
            let message: TaskMessage = envelope.decode_payload()?;
            serde_json::to_string(&task_to_legacy(&message.task))
                .map_err(|e| ProtocolError::Encode(format!("{tag}: {e}")))?
        }
        None => match &envelope.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    Ok(format!("{tag}={body}"))
}
