//! The seam between the peer core and the protocols it runs.
//!
//! A capability owns its own state and handles the tags it declares. It
//! never touches the bus directly: handlers and ticks record what they
//! want sent, and whom they want to subscribe to, in an [`Outbox`] that
//! the core applies once the state lock is released.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gossamer_protocol::{Address, Envelope};

use crate::{PeerError, PeerStatus};

/// Side effects produced by one handler invocation or tick.
#[derive(Debug, Default)]
pub struct Outbox {
    /// Addresses to subscribe to, in join order.
    pub connects: Vec<Address>,
    /// Envelopes to publish, in order.
    pub envelopes: Vec<Envelope>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.connects.is_empty() && self.envelopes.is_empty()
    }
}

/// What a capability sees of its peer while handling a message or tick.
pub struct PeerContext<'a> {
    address: &'a Address,
    group: &'a mut BTreeSet<Address>,
    outbox: &'a mut Outbox,
    now: DateTime<Utc>,
}

impl<'a> PeerContext<'a> {
    pub fn new(
        address: &'a Address,
        group: &'a mut BTreeSet<Address>,
        outbox: &'a mut Outbox,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            group,
            outbox,
            now,
        }
    }

    pub fn address(&self) -> &Address {
        self.address
    }

    pub fn group(&self) -> &BTreeSet<Address> {
        self.group
    }

    /// The peer's own address followed by its group.
    pub fn peers(&self) -> Vec<Address> {
        std::iter::once(self.address.clone())
            .chain(self.group.iter().cloned())
            .collect()
    }

    /// Add `address` to the group and schedule a subscription to it.
    ///
    /// Returns whether the address was new. Joining oneself is a no-op.
    pub fn join(&mut self, address: &Address) -> bool {
        join_group(self.address, self.group, address, self.outbox)
    }

    /// Queue an envelope carrying `payload` under `tag`.
    pub fn broadcast<T: Serialize>(&mut self, tag: &str, payload: &T) -> Result<(), PeerError> {
        let envelope = Envelope::with_payload(self.address, tag, payload)?;
        self.outbox.envelopes.push(envelope);
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

pub(crate) fn join_group(
    own: &Address,
    group: &mut BTreeSet<Address>,
    address: &Address,
    outbox: &mut Outbox,
) -> bool {
    if address == own || !group.insert(address.clone()) {
        return false;
    }
    tracing::debug!(joined = %address, group_size = group.len(), "Joined peer");
    outbox.connects.push(address.clone());
    true
}

/// Point-in-time view of a peer, assembled by the core and its
/// capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub address: Address,
    pub status: PeerStatus,
    pub group: Vec<Address>,
    pub health: Option<f64>,
    pub broadcast_ratio: Option<f64>,
    pub broadcast_delay_secs: Option<f64>,
    pub queue_len: Option<usize>,
    pub dead_letters: Option<usize>,
    pub tasks_completed: Option<u64>,
}

impl StatusReport {
    pub fn new(address: Address, status: PeerStatus, group: Vec<Address>) -> Self {
        Self {
            address,
            status,
            group,
            health: None,
            broadcast_ratio: None,
            broadcast_delay_secs: None,
            queue_len: None,
            dead_letters: None,
            tasks_completed: None,
        }
    }
}

/// A protocol layered onto the peer core.
///
/// When two capabilities declare the same tag, the one registered later
/// receives it.
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;

    /// Message tags this capability handles.
    fn tags(&self) -> &'static [&'static str];

    fn on_message(
        &mut self,
        ctx: &mut PeerContext<'_>,
        envelope: &Envelope,
    ) -> Result<(), PeerError>;

    /// One round of periodic work.
    fn tick(&mut self, _ctx: &mut PeerContext<'_>) -> Result<(), PeerError> {
        Ok(())
    }

    /// Pause before the next tick. `None` means the capability has no
    /// periodic work and no tick loop is started for it.
    fn tick_interval(&mut self) -> Option<Duration> {
        None
    }

    fn report(&self, _report: &mut StatusReport) {}
}
