use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;
use crate::types::{Address, Task};
use crate::ProtocolError;

/// Versioned frame envelope.
///
/// Every frame on the bus is one JSON object on one line. The payload is
/// kept as a raw JSON value so that peers can route on `tag` without
/// understanding the payload of tags they do not handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Publishing peer. Absent on frames decoded from the legacy format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    pub tag: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(sender: &Address, tag: &str, payload: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: Some(uuid::Uuid::new_v4().to_string()),
            sender: Some(sender.clone()),
            tag: tag.to_string(),
            payload,
        }
    }

    /// Build an envelope from a typed payload.
    pub fn with_payload<T: Serialize>(
        sender: &Address,
        tag: &str,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| ProtocolError::Encode(format!("{tag} payload: {e}")))?;
        Ok(Self::new(sender, tag, value))
    }

    /// Decode the payload into the type the tag implies.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::Payload {
            tag: self.tag.clone(),
            reason: e.to_string(),
        })
    }

    pub fn message_tag(&self) -> Option<MessageTag> {
        MessageTag::from_str(&self.tag)
    }
}

/// Tags of the messages this implementation speaks.
///
/// The dispatch layer routes on the raw tag string, so peers may carry
/// additional tags that are not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Sender's peer list.
    Group,
    /// Whether a group announcement taught the sender a new peer.
    Joined,
    /// A serialized task.
    Json,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "GROUP",
            Self::Joined => "JOINED",
            Self::Json => "JSON",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GROUP" => Some(Self::Group),
            "JOINED" => Some(Self::Joined),
            "JSON" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Specific Message Payloads ──

/// `GROUP` payload: the sender's own address followed by its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAnnouncement {
    pub peers: Vec<Address>,
}

/// `JOINED` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReport {
    pub novel: bool,
}

/// `JSON` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: Task,
}

// ── Framing ──

/// Encoding used for outgoing frames. Incoming frames are auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Envelope,
    Legacy,
}

/// Serialize an envelope into a single-line frame.
pub fn encode_frame(envelope: &Envelope, format: WireFormat) -> Result<String, ProtocolError> {
    match format {
        WireFormat::Envelope => serde_json::to_string(envelope)
            .map_err(|e| ProtocolError::Encode(format!("envelope: {e}"))),
        WireFormat::Legacy => crate::legacy::encode_legacy_frame(envelope),
    }
}

/// Parse a frame. JSON objects are read as envelopes; anything else is
/// handed to the legacy `TAG=payload` decoder.
pub fn decode_frame(frame: &str) -> Result<Envelope, ProtocolError> {
    let trimmed = frame.trim();
    if trimmed.starts_with('{') {
        let envelope: Envelope = serde_json::from_str(trimmed)?;
        if envelope.version > PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                found: envelope.version,
                supported: PROTOCOL_VERSION,
            });
        }
        if envelope.tag.is_empty() {
            return Err(ProtocolError::Decode("envelope has an empty tag".into()));
        }
        Ok(envelope)
    } else {
        crate::legacy::decode_legacy_frame(trimmed)
    }
}
