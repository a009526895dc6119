//! Gossip membership: peers learn each other by re-announcing their
//! group, and throttle those announcements by how much news they bring.
//!
//! Two windows of recent outcomes drive the loop:
//! - `join_statuses` records whether received `JOINED` reports were
//!   novel. Health is the share of non-novel entries, so a population
//!   that has stopped learning anything is healthy.
//! - `broadcast_statuses` records whether recent rounds announced. The
//!   broadcast ratio is the share of rounds that did.
//!
//! A round announces while health is below the broadcast ratio. Both
//! windows start full of `true`, which puts health at 0 and the ratio at
//! 1 so a fresh peer announces straight away.

use std::time::Duration;

use gossamer_protocol::{
    Envelope, GroupAnnouncement, JoinReport, MessageTag, StatusWindow,
};

use crate::capability::{Capability, PeerContext, StatusReport};
use crate::{PeerConfig, PeerError};

const TAGS: &[&str] = &["GROUP", "JOINED"];

/// Health below which adaptive delay shortens the announce interval.
const LOW_HEALTH: f64 = 0.5;
/// Health above which adaptive delay stretches it.
const HIGH_HEALTH: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct Membership {
    join_statuses: StatusWindow,
    broadcast_statuses: StatusWindow,
    health: f64,
    broadcast_ratio: f64,
    broadcast_delay: Duration,
    base_delay: Duration,
    min_delay: Duration,
    max_delay: Duration,
    adaptive: bool,
    new_peer_damage: usize,
    weighted_joins: bool,
}

impl Membership {
    pub fn new(config: &PeerConfig) -> Self {
        let join_statuses = StatusWindow::filled(config.window_capacity, true);
        let broadcast_statuses = StatusWindow::filled(config.window_capacity, true);
        let health = join_statuses.ratio(false);
        let broadcast_ratio = broadcast_statuses.ratio(true);
        Self {
            join_statuses,
            broadcast_statuses,
            health,
            broadcast_ratio,
            broadcast_delay: config.broadcast_delay(),
            base_delay: config.broadcast_delay(),
            min_delay: config.min_broadcast_delay(),
            max_delay: config.max_broadcast_delay(),
            adaptive: config.adaptive_delay,
            new_peer_damage: config.new_peer_damage(),
            weighted_joins: config.weighted_joins,
        }
    }

    /// Share of recent join reports that taught nothing new.
    pub fn health(&self) -> f64 {
        self.health
    }

    /// Share of recent rounds that announced.
    pub fn broadcast_ratio(&self) -> f64 {
        self.broadcast_ratio
    }

    pub fn broadcast_delay(&self) -> Duration {
        self.broadcast_delay
    }

    pub fn join_statuses(&self) -> &StatusWindow {
        &self.join_statuses
    }

    pub fn broadcast_statuses(&self) -> &StatusWindow {
        &self.broadcast_statuses
    }

    /// Join every announced peer and report whether any of them was new.
    ///
    /// Every address is joined even after a novel one was found.
    pub fn handle_group(
        &mut self,
        ctx: &mut PeerContext<'_>,
        announcement: &GroupAnnouncement,
    ) -> Result<bool, PeerError> {
        let mut novel = false;
        for address in &announcement.peers {
            novel |= ctx.join(address);
        }
        ctx.broadcast(MessageTag::Joined.as_str(), &JoinReport { novel })?;
        Ok(novel)
    }

    /// Fold a join report into the health estimate.
    pub fn handle_joined(&mut self, report: JoinReport) -> f64 {
        if report.novel && self.weighted_joins {
            self.join_statuses.push_many(true, self.new_peer_damage);
        } else {
            self.join_statuses.push(report.novel);
        }
        self.health = self.join_statuses.ratio(false);
        self.health
    }

    /// One iteration of the announce loop. Returns whether it announced.
    pub fn announce_round(&mut self, ctx: &mut PeerContext<'_>) -> Result<bool, PeerError> {
        self.broadcast_ratio = self.broadcast_statuses.ratio(true);
        let announce = self.health < self.broadcast_ratio;
        if announce {
            let announcement = GroupAnnouncement { peers: ctx.peers() };
            ctx.broadcast(MessageTag::Group.as_str(), &announcement)?;
            tracing::trace!(
                health = self.health,
                ratio = self.broadcast_ratio,
                peers = announcement.peers.len(),
                "Announced group"
            );
        }
        self.broadcast_statuses.push(announce);
        if self.adaptive {
            self.adapt_delay();
        }
        Ok(announce)
    }

    fn adapt_delay(&mut self) {
        let next = if self.health < LOW_HEALTH {
            self.broadcast_delay
                .div_f64(2.0 + (1.0 - self.health))
                .max(self.min_delay)
        } else if self.health > HIGH_HEALTH {
            self.broadcast_delay.saturating_mul(2).min(self.max_delay)
        } else {
            self.base_delay
        };
        if next != self.broadcast_delay {
            tracing::trace!(
                health = self.health,
                delay_ms = next.as_millis() as u64,
                "Broadcast delay adjusted"
            );
        }
        self.broadcast_delay = next;
    }
}

impl Capability for Membership {
    fn name(&self) -> &'static str {
        "membership"
    }

    fn tags(&self) -> &'static [&'static str] {
        TAGS
    }

    fn on_message(
        &mut self,
        ctx: &mut PeerContext<'_>,
        envelope: &Envelope,
    ) -> Result<(), PeerError> {
        match envelope.message_tag() {
            Some(MessageTag::Group) => {
                let announcement: GroupAnnouncement = envelope.decode_payload()?;
                self.handle_group(ctx, &announcement)?;
            }
            Some(MessageTag::Joined) => {
                let report: JoinReport = envelope.decode_payload()?;
                self.handle_joined(report);
            }
            _ => {
                return Err(PeerError::Handler {
                    capability: self.name(),
                    reason: format!("unexpected tag {}", envelope.tag),
                })
            }
        }
        Ok(())
    }

    fn tick(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), PeerError> {
        self.announce_round(ctx).map(|_| ())
    }

    fn tick_interval(&mut self) -> Option<Duration> {
        Some(self.broadcast_delay)
    }

    fn report(&self, report: &mut StatusReport) {
        report.health = Some(self.health);
        report.broadcast_ratio = Some(self.broadcast_ratio);
        report.broadcast_delay_secs = Some(self.broadcast_delay.as_secs_f64());
    }
}
