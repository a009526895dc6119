//! Gossamer Peer - gossip membership and cooperative task distribution.
//!
//! A [`Peer`] owns a bus address, a group of known peers and a stack of
//! [`Capability`] implementations. Two ship with the crate:
//! - [`Membership`]: peers re-announce their group until the population
//!   stops learning anything new, then go quiet.
//! - [`TaskDistributor`]: peers originate tasks for a randomly chosen
//!   owner, relay them until someone completes them, and take over tasks
//!   whose owner stays silent too long.
//!
//! Message handling is serialized per peer. Handlers only record effects;
//! the core publishes them after the state lock is released.

pub mod abilities;
pub mod capability;
pub mod config;
pub mod error;
pub mod membership;
pub mod peer;
pub mod registry;
pub mod tasks;
pub mod topology;
pub mod workload;

pub use abilities::{Ability, AbilityRegistry};
pub use capability::{Capability, Outbox, PeerContext, StatusReport};
pub use config::{PeerConfig, UnknownAbilityPolicy};
pub use error::PeerError;
pub use membership::Membership;
pub use peer::{Peer, PeerBuilder, PeerStatus};
pub use registry::DispatchRegistry;
pub use tasks::{TaskDistributor, WorkOutcome};
pub use topology::{connect_all, connect_linked, connect_random};
pub use workload::{IdleWorkload, RandomWorkload, TaskDraft, Workload};
