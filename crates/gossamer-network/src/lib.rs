//! Gossamer Network - publish/subscribe bus for peers.
//!
//! A peer owns one publisher bound to its own address (fan-out) and one
//! inbound stream fed by subscriptions to every address it has joined
//! (fan-in). Delivery is best effort: a subscriber that connects after a
//! frame was published never sees it, and slow subscribers may lose
//! frames. Frames from one sender to one receiver stay in order.
//!
//! Two transports are provided:
//! - [`memory::MemoryTransport`]: in-process hub, one broadcast channel
//!   per address. Used for simulations and tests.
//! - [`tcp::TcpTransport`]: `tcp://host:port` endpoints, newline framed.

pub mod bus;
pub mod memory;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gossamer_protocol::Address;

pub use bus::BusAdapter;
pub use memory::MemoryTransport;
pub use tcp::{TcpTransport, TcpTransportConfig};

/// Errors raised by the bus and its transports.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Bind failed for {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Subscribe failed for {address}: {reason}")]
    Subscribe { address: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Bus is not bound")]
    NotBound,

    #[error("Bus is closed")]
    Closed,

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] gossamer_protocol::ProtocolError),
}

/// Fan-out side of a peer's bus.
pub trait Publisher: Send + Sync {
    /// Hand a frame to every current subscriber. Returns how many
    /// subscribers it was queued for; zero is not an error.
    fn publish(&self, frame: &str) -> Result<usize, NetworkError>;
}

/// Future returned by [`Transport::bind`].
pub type BindFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Box<dyn Publisher>, NetworkError>> + Send + 'a>>;

/// A way of moving frames between addresses.
pub trait Transport: Send + Sync + 'static {
    /// Open the publishing side at `address`.
    fn bind<'a>(&'a self, address: &'a Address) -> BindFuture<'a>;

    /// Start forwarding every frame published at `address` into `inbound`.
    ///
    /// Subscribing before the publisher is bound is allowed; frames start
    /// flowing once it is.
    fn subscribe(
        &self,
        address: &Address,
        inbound: mpsc::Sender<String>,
    ) -> Result<Subscription, NetworkError>;
}

/// A running subscription. Dropping it stops the forwarding task.
#[derive(Debug)]
pub struct Subscription {
    address: Address,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(address: Address, task: JoinHandle<()>) -> Self {
        Self { address, task }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
