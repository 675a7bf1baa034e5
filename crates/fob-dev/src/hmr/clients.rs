//! Connected HMR clients.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Outgoing channels of all connected clients, keyed by client id.
///
/// Messages are pre-serialized JSON shared between clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<FxHashMap<usize, UnboundedSender<Arc<str>>>>,
    next_id: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client.
    ///
    /// # Returns
    ///
    /// Client id and the receiver its socket task drains
    pub fn register(&self) -> (usize, UnboundedReceiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    /// Send to one client. Returns false if it is gone.
    pub fn send_to(&self, id: usize, message: Arc<str>) -> bool {
        match self.clients.read().get(&id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Send a message to every client.
    ///
    /// All clients are served under one lock, so two broadcasts never
    /// interleave. Clients whose channel is closed are dropped.
    ///
    /// # Returns
    ///
    /// Number of clients the message was delivered to
    pub fn broadcast(&self, message: &Arc<str>) -> usize {
        let mut clients = self.clients.write();
        clients.retain(|_, tx| tx.send(Arc::clone(message)).is_ok());
        clients.len()
    }

    pub fn count(&self) -> usize {
        self.clients.read().len()
    }

    /// Drop every client channel, which ends their socket tasks.
    pub fn clear(&self) {
        self.clients.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_registration() {
        let registry = ClientRegistry::new();

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();

        assert_eq!(registry.count(), 2);
        assert_ne!(id1, id2);

        registry.unregister(id1);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_disconnected_clients() {
        let registry = ClientRegistry::new();
        let (_id1, mut rx1) = registry.register();
        let (_id2, rx2) = registry.register();
        drop(rx2);

        let message: Arc<str> = Arc::from(r#"{"type":"reload"}"#);
        assert_eq!(registry.broadcast(&message), 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(rx1.recv().await.as_deref(), Some(r#"{"type":"reload"}"#));
    }

    #[tokio::test]
    async fn test_clear_closes_receivers() {
        let registry = ClientRegistry::new();
        let (_id, mut rx) = registry.register();
        registry.clear();
        assert!(rx.recv().await.is_none());
    }
}
