//! Gossamer Protocol - Core types and message definitions
//!
//! Defines the peer addressing model, the versioned JSON envelope that
//! every frame travels in, the payloads of the membership and task
//! messages, and the sliding status windows the membership protocol
//! derives its health metric from. A legacy codec accepts the older
//! `TAG=payload` line format.

pub mod constants;
pub mod error;
pub mod legacy;
pub mod messages;
pub mod types;
pub mod window;

pub use constants::*;
pub use error::*;
pub use messages::*;
pub use types::*;
pub use window::StatusWindow;
