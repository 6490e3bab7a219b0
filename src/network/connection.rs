//! Connection Registry
//!
//! Maps each admitted transport connection to the player it represents.
//! Used to resolve fan-out targets for a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::game::state::{PlayerId, SessionId};
use crate::network::protocol::Payload;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Outbound delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's outbound queue is full.
    #[error("Outbound queue full")]
    QueueFull,

    /// The connection's writer has gone away.
    #[error("Connection closed")]
    Closed,
}

/// Sending side of one connection.
///
/// Payloads go into a bounded queue drained by the connection's writer task,
/// so delivery never waits on the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<Payload>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            sender,
            close: Arc::new(Notify::new()),
        };
        (handle, receiver)
    }

    /// Queue a payload without waiting.
    pub fn deliver(&self, payload: Payload) -> Result<(), DeliveryError> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection's reader loop to shut the connection down.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// A registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Player this connection speaks for.
    pub player_id: PlayerId,
    /// Session the player belongs to.
    pub session_id: SessionId,
    /// Outbound side.
    pub handle: ConnectionHandle,
}

/// Process-wide registry of admitted connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an admitted connection.
    pub async fn register(&self, id: ConnectionId, entry: ConnectionEntry) {
        let mut connections = self.connections.write().await;
        connections.insert(id, entry);
    }

    /// Remove a connection. Returns its entry if it was registered.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<ConnectionEntry> {
        let mut connections = self.connections.write().await;
        connections.remove(id)
    }

    /// Remove a connection and close its transport.
    pub async fn evict(&self, id: &ConnectionId) {
        if let Some(entry) = self.unregister(id).await {
            entry.handle.close();
            debug!("Evicted connection {} (player {})", id, entry.player_id);
        }
    }

    /// Player a connection speaks for.
    pub async fn player_of(&self, id: &ConnectionId) -> Option<PlayerId> {
        let connections = self.connections.read().await;
        connections.get(id).map(|e| e.player_id.clone())
    }

    /// Whether a connection is registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Connections registered for a session.
    pub async fn members(&self, session_id: &str) -> Vec<(ConnectionId, ConnectionEntry)> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(_, e)| e.session_id == session_id)
            .map(|(id, e)| (*id, e.clone()))
            .collect()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(player: &str, session: &str) -> (ConnectionEntry, mpsc::Receiver<Payload>) {
        let (handle, rx) = ConnectionHandle::channel(4);
        let entry = ConnectionEntry {
            player_id: player.to_string(),
            session_id: session.to_string(),
            handle,
        };
        (entry, rx)
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let (e, _rx) = entry("p1", "s1");

        registry.register(id, e).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.player_of(&id).await.as_deref(), Some("p1"));

        assert!(registry.unregister(&id).await.is_some());
        assert!(registry.unregister(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_members_filters_by_session() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = entry("p1", "s1");
        let (b, _rb) = entry("p2", "s1");
        let (c, _rc) = entry("p3", "s2");
        registry.register(Uuid::new_v4(), a).await;
        registry.register(Uuid::new_v4(), b).await;
        registry.register(Uuid::new_v4(), c).await;

        let mut players: Vec<_> = registry
            .members("s1")
            .await
            .into_iter()
            .map(|(_, e)| e.player_id)
            .collect();
        players.sort();
        assert_eq!(players, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_deliver_reports_full_and_closed() {
        let (handle, rx) = ConnectionHandle::channel(1);
        assert_eq!(handle.deliver(Payload::from("a")), Ok(()));
        assert_eq!(handle.deliver(Payload::from("b")), Err(DeliveryError::QueueFull));

        drop(rx);
        assert_eq!(handle.deliver(Payload::from("c")), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_evict_signals_close() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let (e, _rx) = entry("p1", "s1");
        let handle = e.handle.clone();
        registry.register(id, e).await;

        registry.evict(&id).await;

        assert!(!registry.contains(&id).await);
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("close was not signalled");
    }
}
