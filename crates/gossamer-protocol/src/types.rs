use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Opaque endpoint identifier of a peer, e.g. `tcp://127.0.0.1:5555`.
///
/// Doubles as the bind target of the peer's publisher and the connect
/// target of everyone subscribing to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Build an address, rejecting empty strings and characters that
    /// would be ambiguous on the legacy wire format.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidAddress("empty address".into()));
        }
        if let Some(c) = trimmed.chars().find(|c| matches!(c, ',' | '[' | ']' | '\'' | ' ')) {
            return Err(ProtocolError::InvalidAddress(format!(
                "'{trimmed}' contains reserved character '{c}'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme prefix, if any (`tcp` for `tcp://host:port`).
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Everything after the scheme separator.
    pub fn endpoint(&self) -> &str {
        self.0.split_once("://").map(|(_, rest)| rest).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::str::FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lifecycle of a distributed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Complete,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A unit of work gossiped between peers.
///
/// `created_at` is the task's identity: reconciliation removes a queued
/// task when a `complete` record with the same creation timestamp is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Peer that generated the task.
    pub sender: Address,
    /// Peer expected to execute the task before it goes stale.
    #[serde(default)]
    pub priority_owner: Option<Address>,
    /// Ability names to run, in order.
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Opaque task data handed to every ability.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Set by the executing peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
}

impl Task {
    /// A fresh pending task stamped with the current time.
    ///
    /// Timestamps are truncated to microseconds so the key survives the
    /// legacy float encoding unchanged.
    pub fn new(
        sender: Address,
        priority_owner: Option<Address>,
        abilities: Vec<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::with_timestamp(sender, priority_owner, abilities, payload, Utc::now())
    }

    pub fn with_timestamp(
        sender: Address,
        priority_owner: Option<Address>,
        abilities: Vec<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender,
            priority_owner,
            abilities,
            payload,
            status: TaskStatus::Pending,
            created_at: created_at.trunc_subsecs(6),
            completed_by: None,
            results: None,
        }
    }

    /// Reconciliation key.
    pub fn key(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    /// Age at `now`; zero for tasks stamped in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Whether the task has outlived its owner's exclusive window.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == TaskStatus::Pending && self.age(now) > threshold
    }

    pub fn is_owned_by(&self, address: &Address) -> bool {
        self.priority_owner.as_ref() == Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_rejects_reserved_characters() {
        assert!(Address::parse("tcp://127.0.0.1:5555").is_ok());
        assert!(Address::parse("").is_err());
        assert!(Address::parse("tcp://a,b").is_err());
        assert!(Address::parse("tcp://[::1]:5555").is_err());
    }

    #[test]
    fn test_address_scheme_and_endpoint() {
        let addr = Address::new("tcp://127.0.0.1:5555");
        assert_eq!(addr.scheme(), Some("tcp"));
        assert_eq!(addr.endpoint(), "127.0.0.1:5555");

        let bare = Address::new("peer-a");
        assert_eq!(bare.scheme(), None);
        assert_eq!(bare.endpoint(), "peer-a");
    }

    #[test]
    fn test_task_staleness() {
        let now = Utc::now();
        let old = Task::with_timestamp(
            Address::new("a"),
            Some(Address::new("b")),
            vec![],
            serde_json::Value::Null,
            now - chrono::Duration::seconds(31),
        );
        assert!(old.is_stale(now, Duration::from_secs(30)));

        let fresh = Task::with_timestamp(
            Address::new("a"),
            None,
            vec![],
            serde_json::Value::Null,
            now - chrono::Duration::seconds(5),
        );
        assert!(!fresh.is_stale(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_completed_task_is_never_stale() {
        let now = Utc::now();
        let mut task = Task::with_timestamp(
            Address::new("a"),
            None,
            vec![],
            serde_json::Value::Null,
            now - chrono::Duration::seconds(120),
        );
        task.status = TaskStatus::Complete;
        assert!(!task.is_stale(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_future_task_has_zero_age() {
        let now = Utc::now();
        let task = Task::with_timestamp(
            Address::new("a"),
            None,
            vec![],
            serde_json::Value::Null,
            now + chrono::Duration::seconds(10),
        );
        assert_eq!(task.age(now), Duration::ZERO);
    }

    #[test]
    fn test_task_timestamp_truncated_to_micros() {
        let task = Task::new(Address::new("a"), None, vec![], serde_json::Value::Null);
        assert_eq!(task.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }
}
