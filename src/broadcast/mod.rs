//! Client Broadcaster
//!
//! Fans serialized events out to every attached browser connection. Each
//! connection owns a bounded outbound queue drained by its socket writer, so a
//! slow client only ever loses its own events. Delivery is at most once per
//! broadcast and there is no replay for clients that attach later.

use crate::observability::metrics;
use crate::protocol::ServerEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Identifier of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Serialized event shared by every recipient of one broadcast
pub type Outbound = Arc<str>;

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Queued on an open connection
    pub delivered: usize,
    /// Connection queue was full
    pub dropped: usize,
    /// Connection already closed
    pub skipped: usize,
}

/// Manages event broadcasting to connected clients
pub struct Broadcaster {
    connections: RwLock<HashMap<ClientId, mpsc::Sender<Outbound>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Broadcaster {
    /// `queue_capacity` is the per-client outbound buffer
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a connection; the receiver feeds its socket writer
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Outbound>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.write().await.insert(id, tx);
        metrics().client_connected();
        debug!(client_id = %id, "Client registered");
        (id, rx)
    }

    /// Remove a connection; unknown ids are ignored
    pub async fn unregister(&self, id: ClientId) {
        if self.connections.write().await.remove(&id).is_some() {
            metrics().client_disconnected();
            debug!(client_id = %id, "Client unregistered");
        }
    }

    /// Send `event` to every open connection
    pub async fn broadcast(&self, event: &ServerEvent) -> Delivery {
        let Some(payload) = serialize(event) else {
            return Delivery::default();
        };

        let connections = self.connections.read().await;
        let mut delivery = Delivery::default();
        for (id, tx) in connections.iter() {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    delivery.dropped += 1;
                    warn!(client_id = %id, event = event.kind(), "Client queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => delivery.skipped += 1,
            }
        }
        drop(connections);

        metrics().broadcast_sent(delivery.delivered, delivery.dropped);
        debug!(
            event = event.kind(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            skipped = delivery.skipped,
            "Broadcast event"
        );
        delivery
    }

    /// Send `event` to one connection only; false if it was not queued
    pub async fn send_to(&self, id: ClientId, event: &ServerEvent) -> bool {
        let Some(payload) = serialize(event) else {
            return false;
        };
        let connections = self.connections.read().await;
        match connections.get(&id) {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => true,
                Err(e) => {
                    warn!(client_id = %id, event = event.kind(), error = %e, "Direct send failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Number of registered connections
    pub async fn client_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

fn serialize(event: &ServerEvent) -> Option<Outbound> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(event = event.kind(), error = %e, "Failed to serialize event");
            None
        }
    }
}
