//! Node configuration: a TOML file with `[peer]`, `[network]`,
//! `[workload]` and `[logging]` sections. Missing sections and keys fall
//! back to their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gossamer_network::TcpTransportConfig;
use gossamer_peer::{PeerConfig, PeerError};
use gossamer_protocol::Address;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Validation(String),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Tcp,
    Memory,
}

/// How the initial groups are seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Each peer knows its successor.
    #[default]
    Ring,
    /// Everyone knows everyone.
    All,
    /// Each ordered pair with `random_probability`.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub transport: TransportKind,
    pub host: String,
    /// Peer `i` listens on `base_port + i`.
    pub base_port: u16,
    /// Number of peers to run.
    pub peers: usize,
    pub topology: Topology,
    pub random_probability: f64,
    pub frame_buffer: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            host: "127.0.0.1".into(),
            base_port: 5555,
            peers: 5,
            topology: Topology::Ring,
            random_probability: 0.5,
            frame_buffer: 1024,
            reconnect_delay_ms: 250,
        }
    }
}

impl NetworkConfig {
    /// Bus addresses of the population, in peer order.
    pub fn addresses(&self) -> Vec<Address> {
        (0..self.peers)
            .map(|i| match self.transport {
                TransportKind::Tcp => {
                    Address::new(format!("tcp://{}:{}", self.host, self.base_port as usize + i))
                }
                TransportKind::Memory => Address::new(format!("mem://peer-{i}")),
            })
            .collect()
    }

    pub fn tcp(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            frame_buffer: self.frame_buffer,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Originate random tasks. Peers always execute and relay others'.
    pub enabled: bool,
    /// Abilities stamped on every generated task.
    pub abilities: Vec<String>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            abilities: vec!["sum".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub status_interval_secs: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            status_interval_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub peer: PeerConfig,
    pub network: NetworkConfig,
    pub workload: WorkloadConfig,
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// `<config dir>/gossamer/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gossamer").join("config.toml"))
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.peer.validate()?;
        if self.network.peers == 0 {
            return Err(ConfigError::Validation("network.peers must be at least 1".into()));
        }
        if self.network.transport == TransportKind::Tcp {
            let last = self.network.base_port as usize + self.network.peers - 1;
            if last > u16::MAX as usize {
                return Err(ConfigError::Validation(format!(
                    "{} peers from port {} overflow the port range",
                    self.network.peers, self.network.base_port
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.network.random_probability) {
            return Err(ConfigError::Validation(
                "network.random_probability must be within 0..=1".into(),
            ));
        }
        if self.workload.enabled && self.workload.abilities.is_empty() {
            return Err(ConfigError::Validation(
                "workload.abilities must not be empty when the workload is enabled".into(),
            ));
        }
        if !(self.logging.status_interval_secs.is_finite() && self.logging.status_interval_secs > 0.0) {
            return Err(ConfigError::Validation(
                "logging.status_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs_f64(self.logging.status_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let config = NodeConfig::from_toml(
            r#"
            [peer]
            broadcast_delay_secs = 0.5
            adaptive_delay = true
            wire_format = "legacy"

            [network]
            transport = "memory"
            peers = 3
            topology = "all"

            [workload]
            abilities = ["sum", "echo"]
            "#,
        )
        .unwrap();
        assert_eq!(config.peer.broadcast_delay_secs, 0.5);
        assert!(config.peer.adaptive_delay);
        assert_eq!(config.peer.wire_format, gossamer_protocol::WireFormat::Legacy);
        assert_eq!(config.network.topology, Topology::All);
        assert_eq!(
            config.network.addresses(),
            vec![
                Address::new("mem://peer-0"),
                Address::new("mem://peer-1"),
                Address::new("mem://peer-2"),
            ]
        );
        assert_eq!(config.workload.abilities, vec!["sum", "echo"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_tcp_addresses_count_up_from_base_port() {
        let network = NetworkConfig {
            peers: 2,
            base_port: 7000,
            ..Default::default()
        };
        assert_eq!(
            network.addresses(),
            vec![
                Address::new("tcp://127.0.0.1:7000"),
                Address::new("tcp://127.0.0.1:7001"),
            ]
        );
    }

    #[test]
    fn test_unknown_transport_rejected() {
        assert!(matches!(
            NodeConfig::from_toml("[network]\ntransport = \"carrier-pigeon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_port_overflow_rejected() {
        let config = NodeConfig {
            network: NetworkConfig {
                base_port: 65535,
                peers: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_peer_section_rejected() {
        let config = NodeConfig::from_toml("[peer]\nwindow_capacity = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Peer(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network]\npeers = 7").unwrap();
        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.network.peers, 7);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            NodeConfig::load(Some(&missing)),
            Err(ConfigError::Io(_))
        ));
    }
}
