//! Connection registry and per-session handles.
//!
//! Every WebSocket session gets a bounded mpsc channel for outbound
//! frames (backpressure without blocking the game loop), a handle in the
//! lock-free registry, and, once authenticated, an entry in the per-map
//! index that drives broadcast fanout.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tilefall_core::messages::Envelope;
use tokio::sync::mpsc;

use super::config::ConnectionConfig;

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Frame to be written to a connection's socket.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A MsgPack-encoded envelope.
    Binary(Vec<u8>),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// Error returned when sending to a connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The channel stayed full for the whole timeout.
    Timeout,
    /// The write loop dropped the receiver; the connection is gone.
    Disconnected,
}

/// Mutable session state attached to a connection.
///
/// Unauthenticated connections have `player_id: None`; the authentication
/// step fills in the identity and the map index entry.
#[derive(Debug, Default, Clone)]
pub struct SessionInfo {
    pub authenticated: bool,
    pub player_id: Option<i64>,
    pub username: Option<String>,
    pub map_id: Option<String>,
}

/// Handle to one connection: sender end of its outbound channel plus
/// session metadata.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<OutboundMessage>,
    pub session: RwLock<SessionInfo>,
    pub connected_at: Instant,
}

impl ConnectionHandle {
    /// Attempts to enqueue a frame without blocking.
    ///
    /// Returns `false` when the channel is full or closed; event delivery
    /// is best-effort, so callers drop the frame in that case.
    #[must_use]
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Encodes an envelope and enqueues it without blocking.
    #[must_use]
    pub fn try_send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(bytes) => self.try_send(OutboundMessage::Binary(bytes)),
            Err(err) => {
                tracing::error!(%err, kind = %envelope.kind, "failed to encode envelope");
                false
            }
        }
    }

    /// Sends a frame, waiting up to `timeout` for channel room. Command
    /// responses use this so a briefly slow session does not lose them.
    ///
    /// # Errors
    ///
    /// `Timeout` when the channel stays full, `Disconnected` when the
    /// write loop has exited.
    pub async fn send_timeout(
        &self,
        msg: OutboundMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Whether the write loop still holds the receiver.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// The authenticated player id, if any.
    #[must_use]
    pub fn player_id(&self) -> Option<i64> {
        self.session.read().player_id
    }
}

/// Thread-safe registry of all active connections plus the per-map index
/// used for broadcast fanout.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    by_map: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Connection ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_map: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection, returning its handle and the receiver
    /// for the socket write loop.
    pub fn register(
        &self,
        config: &ConnectionConfig,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let handle = Arc::new(ConnectionHandle {
            id,
            tx,
            session: RwLock::new(SessionInfo::default()),
            connected_at: Instant::now(),
        });
        self.connections.insert(id, Arc::clone(&handle));
        metrics::gauge!("active_connections").set(self.connections.len() as f64);
        (handle, rx)
    }

    /// Removes a connection, including its map-index entry.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(&id).map(|(_, handle)| handle);
        if let Some(handle) = &removed {
            if let Some(map_id) = handle.session.read().map_id.clone() {
                if let Some(mut set) = self.by_map.get_mut(&map_id) {
                    set.remove(&id);
                }
            }
        }
        metrics::gauge!("active_connections").set(self.connections.len() as f64);
        removed
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Marks a connection authenticated with its player identity.
    pub fn set_player(&self, id: ConnectionId, player_id: i64, username: &str) {
        if let Some(handle) = self.get(id) {
            let mut session = handle.session.write();
            session.authenticated = true;
            session.player_id = Some(player_id);
            session.username = Some(username.to_string());
        }
    }

    /// Moves a connection onto a map, maintaining the fanout index.
    pub fn set_map(&self, id: ConnectionId, map_id: &str) {
        let Some(handle) = self.get(id) else { return };
        let previous = {
            let mut session = handle.session.write();
            session.map_id.replace(map_id.to_string())
        };
        if let Some(previous) = previous {
            if let Some(mut set) = self.by_map.get_mut(&previous) {
                set.remove(&id);
            }
        }
        self.by_map.entry(map_id.to_string()).or_default().insert(id);
    }

    /// The connection of an authenticated player, if online.
    #[must_use]
    pub fn find_by_player(&self, player_id: i64) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .find(|handle| handle.player_id() == Some(player_id))
    }

    /// All connections currently on one map.
    #[must_use]
    pub fn connections_on_map(&self, map_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let Some(ids) = self.by_map.get(map_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Fans an envelope out to every session on `map_id` whose
    /// [`SessionInfo`] passes `predicate`.
    ///
    /// Encoding happens once; delivery is best-effort `try_send` so a slow
    /// session drops events instead of stalling the broadcast.
    pub fn fanout<F>(&self, map_id: &str, predicate: F, envelope: &Envelope)
    where
        F: Fn(&SessionInfo) -> bool,
    {
        let Ok(bytes) = envelope.encode() else {
            tracing::error!(kind = %envelope.kind, "failed to encode fanout envelope");
            return;
        };
        for handle in self.connections_on_map(map_id) {
            let matches = predicate(&handle.session.read());
            if matches {
                let _ = handle.try_send(OutboundMessage::Binary(bytes.clone()));
            }
        }
    }

    /// Sends an envelope to every authenticated session (server-wide
    /// notices, shutdown).
    pub fn broadcast_all(&self, envelope: &Envelope) {
        let Ok(bytes) = envelope.encode() else { return };
        for entry in &self.connections {
            let handle = entry.value();
            if handle.session.read().authenticated {
                let _ = handle.try_send(OutboundMessage::Binary(bytes.clone()));
            }
        }
    }

    /// Removes and returns all connections. Used during graceful shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = self.remove(id) {
                handles.push(handle);
            }
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    fn small_config() -> ConnectionConfig {
        ConnectionConfig {
            outbound_channel_capacity: 2,
            ..ConnectionConfig::default()
        }
    }

    fn envelope(kind: &str) -> Envelope {
        Envelope::new("e-1", kind, rmpv::Value::Nil)
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = registry.register(&config());
        let (h2, _rx2) = registry.register(&config());
        assert_eq!(h1.id, ConnectionId(1));
        assert_eq!(h2.id, ConnectionId(2));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn remove_clears_registry_and_map_index() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&config());
        registry.set_map(handle.id, "samplemap");
        assert_eq!(registry.connections_on_map("samplemap").len(), 1);

        assert!(registry.remove(handle.id).is_some());
        assert_eq!(registry.count(), 0);
        assert!(registry.connections_on_map("samplemap").is_empty());
        assert!(registry.remove(handle.id).is_none());
    }

    #[test]
    fn set_player_marks_authenticated() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&config());
        assert!(!handle.session.read().authenticated);

        registry.set_player(handle.id, 7, "alice");
        let session = handle.session.read();
        assert!(session.authenticated);
        assert_eq!(session.player_id, Some(7));
        assert_eq!(session.username.as_deref(), Some("alice"));
    }

    #[test]
    fn set_map_moves_between_indexes() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&config());

        registry.set_map(handle.id, "overworld");
        registry.set_map(handle.id, "dungeon");

        assert!(registry.connections_on_map("overworld").is_empty());
        assert_eq!(registry.connections_on_map("dungeon").len(), 1);
    }

    #[test]
    fn find_by_player_only_matches_authenticated() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = registry.register(&config());
        let (_h2, _rx2) = registry.register(&config());
        registry.set_player(h1.id, 7, "alice");

        assert_eq!(registry.find_by_player(7).unwrap().id, h1.id);
        assert!(registry.find_by_player(8).is_none());
    }

    #[test]
    fn fanout_respects_map_and_predicate() {
        let registry = ConnectionRegistry::new();
        let (h1, mut rx1) = registry.register(&config());
        let (h2, mut rx2) = registry.register(&config());
        let (h3, mut rx3) = registry.register(&config());
        registry.set_player(h1.id, 1, "a");
        registry.set_player(h2.id, 2, "b");
        registry.set_player(h3.id, 3, "c");
        registry.set_map(h1.id, "samplemap");
        registry.set_map(h2.id, "samplemap");
        registry.set_map(h3.id, "othermap");

        registry.fanout(
            "samplemap",
            |session| session.player_id != Some(1),
            &envelope("event_state_update"),
        );

        assert!(rx1.try_recv().is_err(), "excluded by predicate");
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err(), "different map");
    }

    #[test]
    fn fanout_skips_full_channels_without_blocking() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&small_config());
        registry.set_map(handle.id, "samplemap");

        assert!(handle.try_send(OutboundMessage::Binary(vec![1])));
        assert!(handle.try_send(OutboundMessage::Binary(vec![2])));
        // Channel full: fanout drops the frame and returns.
        registry.fanout("samplemap", |_| true, &envelope("event_state_update"));
    }

    #[test]
    fn broadcast_all_reaches_only_authenticated_sessions() {
        let registry = ConnectionRegistry::new();
        let (h1, mut rx1) = registry.register(&config());
        let (_h2, mut rx2) = registry.register(&config());
        registry.set_player(h1.id, 1, "a");

        registry.broadcast_all(&envelope("event_server_shutdown"));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err(), "handshake-phase session skipped");
    }

    #[tokio::test]
    async fn send_timeout_reports_disconnect() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.register(&config());
        drop(rx);

        let result = handle
            .send_timeout(OutboundMessage::Binary(vec![1]), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(SendError::Disconnected));
        assert!(!handle.is_connected());
    }

    #[test]
    fn drain_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (_h1, _rx1) = registry.register(&config());
        let (_h2, _rx2) = registry.register(&config());
        assert_eq!(registry.drain_all().len(), 2);
        assert_eq!(registry.count(), 0);
    }
}
