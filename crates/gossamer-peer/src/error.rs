use gossamer_network::NetworkError;
use gossamer_protocol::ProtocolError;

/// Errors raised by peers, their capabilities and their configuration.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handler error in {capability}: {reason}")]
    Handler {
        capability: &'static str,
        reason: String,
    },

    #[error("Ability {ability} failed: {reason}")]
    Ability { ability: String, reason: String },

    #[error("Invalid lifecycle transition: peer is {found}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        found: crate::PeerStatus,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}
