//! Per-peer bus adapter: one publisher, many subscriptions, one inbound
//! stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use gossamer_protocol::{encode_frame, Address, Envelope, WireFormat};

use crate::{NetworkError, Publisher, Subscription, Transport};

/// String-in/string-out bus owned by exactly one peer.
pub struct BusAdapter {
    address: Address,
    transport: Arc<dyn Transport>,
    wire_format: WireFormat,
    publisher: RwLock<Option<Box<dyn Publisher>>>,
    subscriptions: Mutex<HashMap<Address, Subscription>>,
    inbound_tx: Mutex<Option<mpsc::Sender<String>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl BusAdapter {
    pub fn new(
        address: Address,
        transport: Arc<dyn Transport>,
        wire_format: WireFormat,
        inbound_buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(inbound_buffer.max(1));
        Self {
            address,
            transport,
            wire_format,
            publisher: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Open the publishing side at the peer's own address.
    pub async fn bind(&self) -> Result<(), NetworkError> {
        let publisher = self.transport.bind(&self.address).await?;
        *self.publisher.write().await = Some(publisher);
        Ok(())
    }

    pub async fn is_bound(&self) -> bool {
        self.publisher.read().await.is_some()
    }

    /// Subscribe to `address`. Returns `false` if already subscribed.
    pub async fn connect(&self, address: &Address) -> Result<bool, NetworkError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(address) {
            return Ok(false);
        }
        let inbound = self
            .inbound_tx
            .lock()
            .await
            .clone()
            .ok_or(NetworkError::Closed)?;
        let subscription = self.transport.subscribe(address, inbound)?;
        subscriptions.insert(address.clone(), subscription);
        tracing::debug!(peer = %self.address, target = %address, "Subscribed");
        Ok(true)
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Publish a raw frame. Returns the number of subscribers reached.
    pub async fn publish(&self, frame: &str) -> Result<usize, NetworkError> {
        let publisher = self.publisher.read().await;
        let publisher = publisher.as_ref().ok_or(NetworkError::NotBound)?;
        let reached = publisher.publish(frame)?;
        tracing::trace!(peer = %self.address, reached, frame = %frame, "Frame sent");
        Ok(reached)
    }

    /// Encode an envelope in the configured wire format and publish it.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize, NetworkError> {
        let frame = encode_frame(envelope, self.wire_format)?;
        self.publish(&frame).await
    }

    /// Take the inbound frame stream. Only the first caller gets it.
    pub async fn take_inbound(&self) -> Option<mpsc::Receiver<String>> {
        self.inbound_rx.lock().await.take()
    }

    /// Drop the publisher and every subscription.
    pub async fn close(&self) {
        self.publisher.write().await.take();
        self.subscriptions.lock().await.clear();
        self.inbound_tx.lock().await.take();
        tracing::debug!(peer = %self.address, "Bus closed");
    }
}
