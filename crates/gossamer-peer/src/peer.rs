//! The peer core: owns the bus, the group and the capabilities, and runs
//! one receive loop plus one tick loop per capability.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;

use gossamer_network::{BusAdapter, NetworkError, Transport};
use gossamer_protocol::{decode_frame, Address, Envelope};

use crate::abilities::AbilityRegistry;
use crate::capability::{join_group, Capability, Outbox, PeerContext, StatusReport};
use crate::membership::Membership;
use crate::registry::DispatchRegistry;
use crate::tasks::TaskDistributor;
use crate::workload::Workload;
use crate::{PeerConfig, PeerError};

/// Lifecycle of a peer. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Created,
    Running,
    TearingDown,
    Stopped,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::TearingDown => "tearing_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything handlers touch. Guarded by one lock so that handling a
/// message never interleaves with a tick.
pub(crate) struct PeerState {
    address: Address,
    group: BTreeSet<Address>,
    capabilities: Vec<Box<dyn Capability>>,
    registry: DispatchRegistry<usize>,
}

impl PeerState {
    fn new(address: Address, capabilities: Vec<Box<dyn Capability>>) -> Self {
        let mut registry = DispatchRegistry::new();
        for (index, capability) in capabilities.iter().enumerate() {
            for tag in capability.tags() {
                registry.register(tag, index);
            }
        }
        Self {
            address,
            group: BTreeSet::new(),
            capabilities,
            registry,
        }
    }

    /// Route an envelope to the capability owning its tag. Unknown tags
    /// are ignored. A panicking handler is reported as a handler error and
    /// its effects are dropped.
    fn dispatch(&mut self, envelope: &Envelope, now: DateTime<Utc>) -> Result<Outbox, PeerError> {
        let mut outbox = Outbox::default();
        let Some(index) = self.registry.route(&envelope.tag) else {
            tracing::debug!(tag = %envelope.tag, "No handler for tag, ignoring");
            return Ok(outbox);
        };
        let Some(capability) = self.capabilities.get_mut(index) else {
            return Ok(outbox);
        };
        let name = capability.name();
        let mut ctx = PeerContext::new(&self.address, &mut self.group, &mut outbox, now);
        catch_unwind(AssertUnwindSafe(|| capability.on_message(&mut ctx, envelope)))
            .map_err(|_| PeerError::Handler {
                capability: name,
                reason: format!("panicked handling {}", envelope.tag),
            })??;
        Ok(outbox)
    }

    /// Run one tick of capability `index` and return its effects and the
    /// pause before the next one.
    fn tick(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> (Result<Outbox, PeerError>, Option<Duration>) {
        let Some(capability) = self.capabilities.get_mut(index) else {
            return (Ok(Outbox::default()), None);
        };
        let mut outbox = Outbox::default();
        let name = capability.name();
        let mut ctx = PeerContext::new(&self.address, &mut self.group, &mut outbox, now);
        let result = catch_unwind(AssertUnwindSafe(|| capability.tick(&mut ctx))).unwrap_or_else(|_| {
            Err(PeerError::Handler {
                capability: name,
                reason: "panicked during tick".into(),
            })
        });
        let next = capability.tick_interval();
        (result.map(|()| outbox), next)
    }

    fn join(&mut self, address: &Address) -> (bool, Outbox) {
        let mut outbox = Outbox::default();
        let novel = join_group(&self.address, &mut self.group, address, &mut outbox);
        (novel, outbox)
    }
}

/// Builder for [`Peer`]. Membership is always present; task distribution
/// and extra capabilities are opt-in.
pub struct PeerBuilder {
    address: Address,
    transport: Arc<dyn Transport>,
    config: PeerConfig,
    tasks: Option<(AbilityRegistry, Box<dyn Workload>)>,
    extra: Vec<Box<dyn Capability>>,
}

impl PeerBuilder {
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable task distribution with the given abilities and workload.
    pub fn with_tasks(mut self, abilities: AbilityRegistry, workload: impl Workload + 'static) -> Self {
        let workload: Box<dyn Workload> = Box::new(workload);
        self.tasks = Some((abilities, workload));
        self
    }

    /// Layer an additional capability on top. Its tags take precedence
    /// over those of earlier capabilities.
    pub fn with_capability(mut self, capability: impl Capability + 'static) -> Self {
        self.extra.push(Box::new(capability));
        self
    }

    pub fn build(self) -> Result<Peer, PeerError> {
        self.config.validate()?;
        let mut capabilities: Vec<Box<dyn Capability>> =
            vec![Box::new(Membership::new(&self.config))];
        if let Some((abilities, workload)) = self.tasks {
            capabilities.push(Box::new(TaskDistributor::new(&self.config, abilities, workload)));
        }
        capabilities.extend(self.extra);

        let bus = BusAdapter::new(
            self.address.clone(),
            self.transport,
            self.config.wire_format,
            self.config.inbound_buffer,
        );
        Ok(Peer {
            state: Arc::new(RwLock::new(PeerState::new(self.address.clone(), capabilities))),
            address: self.address,
            config: self.config,
            bus: Arc::new(bus),
            status: PeerStatus::Created,
            tasks: Vec::new(),
        })
    }
}

/// A single participant in the population.
pub struct Peer {
    address: Address,
    config: PeerConfig,
    state: Arc<RwLock<PeerState>>,
    bus: Arc<BusAdapter>,
    status: PeerStatus,
    tasks: Vec<JoinHandle<()>>,
}

impl Peer {
    pub fn builder(address: Address, transport: Arc<dyn Transport>) -> PeerBuilder {
        PeerBuilder {
            address,
            transport,
            config: PeerConfig::default(),
            tasks: None,
            extra: Vec::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Known peers, excluding self.
    pub async fn group(&self) -> Vec<Address> {
        self.state.read().await.group.iter().cloned().collect()
    }

    /// Own address followed by the group.
    pub async fn peers(&self) -> Vec<Address> {
        let state = self.state.read().await;
        std::iter::once(self.address.clone())
            .chain(state.group.iter().cloned())
            .collect()
    }

    /// Add a peer to the group and subscribe to it. Works before setup;
    /// returns whether the address was new.
    pub async fn join(&self, address: &Address) -> Result<bool, PeerError> {
        let (novel, outbox) = self.state.write().await.join(address);
        for target in &outbox.connects {
            self.bus.connect(target).await?;
        }
        Ok(novel)
    }

    /// Publish a custom message under `tag`.
    pub async fn broadcast<T: Serialize>(&self, tag: &str, payload: &T) -> Result<usize, PeerError> {
        let envelope = Envelope::with_payload(&self.address, tag, payload)?;
        Ok(self.bus.broadcast(&envelope).await?)
    }

    /// Bind the bus, subscribe to self and start the loops.
    pub async fn setup(&mut self) -> Result<(), PeerError> {
        if self.status != PeerStatus::Created {
            return Err(PeerError::InvalidState {
                expected: "created",
                found: self.status,
            });
        }
        self.bus.bind().await?;
        self.bus.connect(&self.address).await?;
        let inbound = self.bus.take_inbound().await.ok_or(NetworkError::Closed)?;

        let span = tracing::info_span!("peer", address = %self.address);
        self.tasks.push(tokio::spawn(
            receive_loop(self.state.clone(), self.bus.clone(), inbound).instrument(span.clone()),
        ));

        let ticking: Vec<(usize, &'static str)> = {
            let mut state = self.state.write().await;
            state
                .capabilities
                .iter_mut()
                .enumerate()
                .filter_map(|(index, capability)| {
                    capability
                        .tick_interval()
                        .map(|_| (index, capability.name()))
                })
                .collect()
        };
        for (index, name) in ticking {
            tracing::debug!(parent: &span, capability = name, "Starting tick loop");
            self.tasks.push(tokio::spawn(
                tick_loop(self.state.clone(), self.bus.clone(), index, name)
                    .instrument(span.clone()),
            ));
        }

        self.status = PeerStatus::Running;
        tracing::info!(parent: &span, "Peer running");
        Ok(())
    }

    /// Stop every loop and release the bus.
    pub async fn teardown(&mut self) -> Result<(), PeerError> {
        match self.status {
            PeerStatus::Created | PeerStatus::Running => {}
            found => {
                return Err(PeerError::InvalidState {
                    expected: "created or running",
                    found,
                })
            }
        }
        self.status = PeerStatus::TearingDown;
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(peer = %self.address, error = %e, "Peer task failed");
                }
            }
        }
        self.bus.close().await;
        self.status = PeerStatus::Stopped;
        tracing::info!(peer = %self.address, "Peer stopped");
        Ok(())
    }

    pub async fn report(&self) -> StatusReport {
        let state = self.state.read().await;
        let mut report = StatusReport::new(
            self.address.clone(),
            self.status,
            state.group.iter().cloned().collect(),
        );
        for capability in &state.capabilities {
            capability.report(&mut report);
        }
        report
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn apply(bus: &BusAdapter, outbox: Outbox) {
    for target in &outbox.connects {
        if let Err(e) = bus.connect(target).await {
            tracing::warn!(target = %target, error = %e, "Failed to subscribe to peer");
        }
    }
    for envelope in &outbox.envelopes {
        match bus.broadcast(envelope).await {
            Ok(reached) => tracing::trace!(tag = %envelope.tag, reached, "Broadcast sent"),
            Err(e) => tracing::warn!(tag = %envelope.tag, error = %e, "Broadcast failed"),
        }
    }
}

async fn receive_loop(
    state: Arc<RwLock<PeerState>>,
    bus: Arc<BusAdapter>,
    mut inbound: mpsc::Receiver<String>,
) {
    while let Some(frame) = inbound.recv().await {
        let envelope = match decode_frame(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                continue;
            }
        };
        let result = state.write().await.dispatch(&envelope, Utc::now());
        match result {
            Ok(outbox) => apply(&bus, outbox).await,
            Err(e) => tracing::warn!(
                tag = %envelope.tag,
                sender = ?envelope.sender.as_ref().map(Address::as_str),
                error = %e,
                "Handler failed"
            ),
        }
    }
    tracing::debug!("Inbound stream closed");
}

async fn tick_loop(
    state: Arc<RwLock<PeerState>>,
    bus: Arc<BusAdapter>,
    index: usize,
    name: &'static str,
) {
    loop {
        let (result, next) = state.write().await.tick(index, Utc::now());
        match result {
            Ok(outbox) => apply(&bus, outbox).await,
            Err(e) => tracing::warn!(capability = name, error = %e, "Tick failed"),
        }
        match next {
            Some(delay) => tokio::time::sleep(delay).await,
            None => break,
        }
    }
}
