/// Errors raised while encoding or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Unsupported envelope version {found} (max supported {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unexpected payload for {tag}: {reason}")]
    Payload { tag: String, reason: String },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}
