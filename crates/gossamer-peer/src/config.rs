use std::time::Duration;

use serde::{Deserialize, Serialize};

use gossamer_protocol::{
    default_new_peer_damage, WireFormat, DEFAULT_BROADCAST_DELAY_SECS, DEFAULT_INBOUND_BUFFER,
    DEFAULT_MAX_BROADCAST_DELAY_SECS, DEFAULT_MIN_BROADCAST_DELAY_SECS, DEFAULT_RESOLVED_MEMORY,
    DEFAULT_STALENESS_THRESHOLD_SECS, DEFAULT_WINDOW_CAPACITY, DEFAULT_WORKLOAD_JITTER_MAX_SECS,
    DEFAULT_WORKLOAD_JITTER_MIN_SECS,
};

use crate::PeerError;

/// What to do with a task naming an ability nobody registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownAbilityPolicy {
    /// Mark the task complete anyway so it cannot circulate forever.
    #[default]
    FailOpen,
    /// Park the task locally without completing it.
    DeadLetter,
}

/// Runtime knobs of a single peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Base seconds between group-announce attempts.
    pub broadcast_delay_secs: f64,
    /// Let population health stretch or shrink the announce delay.
    pub adaptive_delay: bool,
    pub min_broadcast_delay_secs: f64,
    pub max_broadcast_delay_secs: f64,
    /// Age after which any peer may execute a pending task.
    pub staleness_threshold_secs: f64,
    /// Capacity of the join and broadcast status windows.
    pub window_capacity: usize,
    /// Window entries contributed by one novel join. Defaults to a tenth
    /// of the window.
    pub new_peer_damage: Option<usize>,
    /// Amplify novel joins by `new_peer_damage`; otherwise one entry each.
    pub weighted_joins: bool,
    pub workload_jitter_min_secs: f64,
    pub workload_jitter_max_secs: f64,
    pub unknown_ability_policy: UnknownAbilityPolicy,
    /// Completed task keys remembered for duplicate suppression.
    pub resolved_memory: usize,
    pub inbound_buffer: usize,
    /// Encoding of outgoing frames.
    pub wire_format: WireFormat,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            broadcast_delay_secs: DEFAULT_BROADCAST_DELAY_SECS,
            adaptive_delay: false,
            min_broadcast_delay_secs: DEFAULT_MIN_BROADCAST_DELAY_SECS,
            max_broadcast_delay_secs: DEFAULT_MAX_BROADCAST_DELAY_SECS,
            staleness_threshold_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            new_peer_damage: None,
            weighted_joins: true,
            workload_jitter_min_secs: DEFAULT_WORKLOAD_JITTER_MIN_SECS,
            workload_jitter_max_secs: DEFAULT_WORKLOAD_JITTER_MAX_SECS,
            unknown_ability_policy: UnknownAbilityPolicy::default(),
            resolved_memory: DEFAULT_RESOLVED_MEMORY,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            wire_format: WireFormat::default(),
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), PeerError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PeerError::Config(format!("{name} must be a positive number, got {value}")))
    }
}

impl PeerConfig {
    pub fn validate(&self) -> Result<(), PeerError> {
        positive("broadcast_delay_secs", self.broadcast_delay_secs)?;
        positive("staleness_threshold_secs", self.staleness_threshold_secs)?;
        if self.adaptive_delay {
            positive("min_broadcast_delay_secs", self.min_broadcast_delay_secs)?;
            positive("max_broadcast_delay_secs", self.max_broadcast_delay_secs)?;
            if self.min_broadcast_delay_secs > self.max_broadcast_delay_secs {
                return Err(PeerError::Config(format!(
                    "min_broadcast_delay_secs ({}) exceeds max_broadcast_delay_secs ({})",
                    self.min_broadcast_delay_secs, self.max_broadcast_delay_secs
                )));
            }
        }
        if self.window_capacity == 0 {
            return Err(PeerError::Config("window_capacity must be at least 1".into()));
        }
        let damage = self.new_peer_damage();
        if damage == 0 || damage > self.window_capacity {
            return Err(PeerError::Config(format!(
                "new_peer_damage must be within 1..={}, got {damage}",
                self.window_capacity
            )));
        }
        let (lo, hi) = (self.workload_jitter_min_secs, self.workload_jitter_max_secs);
        if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || lo > hi {
            return Err(PeerError::Config(format!(
                "workload jitter range {lo}..{hi} is invalid"
            )));
        }
        if self.inbound_buffer == 0 {
            return Err(PeerError::Config("inbound_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn broadcast_delay(&self) -> Duration {
        Duration::from_secs_f64(self.broadcast_delay_secs)
    }

    pub fn min_broadcast_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_broadcast_delay_secs)
    }

    pub fn max_broadcast_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_broadcast_delay_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.staleness_threshold_secs)
    }

    pub fn new_peer_damage(&self) -> usize {
        self.new_peer_damage
            .unwrap_or_else(|| default_new_peer_damage(self.window_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PeerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.new_peer_damage(), 10);
        assert_eq!(config.staleness_threshold(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_non_positive_delay() {
        let config = PeerConfig {
            broadcast_delay_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PeerError::Config(_))));
    }

    #[test]
    fn test_rejects_damage_larger_than_window() {
        let config = PeerConfig {
            window_capacity: 5,
            new_peer_damage: Some(6),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_jitter() {
        let config = PeerConfig {
            workload_jitter_min_secs: 2.0,
            workload_jitter_max_secs: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_adaptive_bounds_checked_only_when_enabled() {
        let mut config = PeerConfig {
            min_broadcast_delay_secs: 10.0,
            max_broadcast_delay_secs: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.adaptive_delay = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PeerConfig = serde_json::from_str(
            r#"{"broadcast_delay_secs": 0.5, "unknown_ability_policy": "dead_letter"}"#,
        )
        .unwrap();
        assert_eq!(config.broadcast_delay_secs, 0.5);
        assert_eq!(config.unknown_ability_policy, UnknownAbilityPolicy::DeadLetter);
        assert_eq!(config.window_capacity, DEFAULT_WINDOW_CAPACITY);
    }
}
