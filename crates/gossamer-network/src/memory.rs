//! In-process transport: one tokio broadcast channel per address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

use gossamer_protocol::Address;

use crate::{BindFuture, NetworkError, Publisher, Subscription, Transport};

/// Default frames buffered per address before slow subscribers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Shared hub; clone it into every peer of a simulated population.
#[derive(Clone)]
pub struct MemoryTransport {
    channels: Arc<Mutex<HashMap<Address, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn channel(&self, address: &Address) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(address.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of addresses the hub has seen.
    pub fn address_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryPublisher {
    sender: broadcast::Sender<String>,
}

impl Publisher for MemoryPublisher {
    fn publish(&self, frame: &str) -> Result<usize, NetworkError> {
        // No receivers means nobody is listening yet; the frame is lost.
        Ok(self.sender.send(frame.to_string()).unwrap_or(0))
    }
}

impl Transport for MemoryTransport {
    fn bind<'a>(&'a self, address: &'a Address) -> BindFuture<'a> {
        Box::pin(async move {
            let sender = self.channel(address);
            Ok(Box::new(MemoryPublisher { sender }) as Box<dyn Publisher>)
        })
    }

    fn subscribe(
        &self,
        address: &Address,
        inbound: mpsc::Sender<String>,
    ) -> Result<Subscription, NetworkError> {
        let mut rx = self.channel(address).subscribe();
        let source = address.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if inbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(source = %source, skipped, "Subscriber lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(address.clone(), task))
    }
}
