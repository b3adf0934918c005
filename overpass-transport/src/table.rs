//! Logical connection tracking.
//!
//! The table owns every [`LogicalConnection`] and is the single source of
//! truth for the (destination, port) → id mapping. It is written only from
//! the driver's serial command drain, so it needs no interior locking.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Unique identifier for a logical connection.
///
/// Ids are dense small integers starting at 0; a removed id becomes eligible
/// for reuse by the next allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Create a connection id from a raw value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One application-level peer pairing, distinct from any physical stream.
#[derive(Debug, Clone)]
pub struct LogicalConnection {
    /// Identifier handed to the host layer.
    pub id: ConnectionId,
    /// Local node identity.
    pub source: String,
    /// Remote node identity.
    pub destination: String,
    /// Logical port distinguishing connections between the same pair.
    pub port: i32,
    /// When the connection was created.
    pub created_at: Instant,
    /// Last time a message was sent on this connection.
    pub last_send: Instant,
    /// Last time a message was received on this connection.
    pub last_recv: Instant,
    /// Number of messages sent.
    pub messages_sent: u64,
    /// Number of messages received.
    pub messages_recv: u64,
    /// Last measured round-trip time.
    pub last_rtt: Option<Duration>,
}

impl LogicalConnection {
    fn new(id: ConnectionId, source: &str, destination: &str, port: i32, now: Instant) -> Self {
        Self {
            id,
            source: source.to_string(),
            destination: destination.to_string(),
            port,
            created_at: now,
            last_send: now,
            last_recv: now,
            messages_sent: 0,
            messages_recv: 0,
            last_rtt: None,
        }
    }

    /// Record that a message was sent on this connection.
    pub fn record_send(&mut self, now: Instant) {
        self.last_send = now;
        self.messages_sent += 1;
    }

    /// Record that a message was received on this connection.
    pub fn record_recv(&mut self, now: Instant) {
        self.last_recv = now;
        self.messages_recv += 1;
    }

    /// Record a measured round-trip time.
    pub fn record_rtt(&mut self, rtt: Duration) {
        self.last_rtt = Some(rtt);
    }

    /// Time since the connection was created.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

impl fmt::Display for LogicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {}:{})", self.id, self.source, self.destination, self.port)
    }
}

/// Tracks logical connections keyed by (destination, port).
#[derive(Debug, Default)]
pub struct ConnectionTable {
    /// Id lookup by remote endpoint.
    by_peer: HashMap<(String, i32), ConnectionId>,
    /// Connection state by id.
    connections: HashMap<ConnectionId, LogicalConnection>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for (destination, port), allocating a connection if the
    /// pair is new. Idempotent for a repeated pair.
    pub fn add_or_get(
        &mut self,
        source: &str,
        destination: &str,
        port: i32,
        now: Instant,
    ) -> ConnectionId {
        let key = (destination.to_string(), port);
        if let Some(id) = self.by_peer.get(&key) {
            return *id;
        }

        let id = self.allocate_id();
        let connection = LogicalConnection::new(id, source, destination, port, now);
        tracing::debug!(connection = %connection, "Logical connection created");

        self.by_peer.insert(key, id);
        self.connections.insert(id, connection);
        id
    }

    /// Look up the id for (destination, port). `None` means "unknown peer",
    /// which is not an error under the broker's fan-out model.
    pub fn get(&self, destination: &str, port: i32) -> Option<ConnectionId> {
        self.by_peer.get(&(destination.to_string(), port)).copied()
    }

    /// Remove a connection. No-op when the id is absent.
    pub fn remove(&mut self, id: ConnectionId) -> Option<LogicalConnection> {
        let connection = self.connections.remove(&id)?;
        self.by_peer.remove(&(connection.destination.clone(), connection.port));
        tracing::debug!(connection = %connection, "Logical connection removed");
        Some(connection)
    }

    /// Get a connection by id.
    pub fn get_info(&self, id: ConnectionId) -> Option<&LogicalConnection> {
        self.connections.get(&id)
    }

    /// Get a mutable connection by id.
    pub fn get_info_mut(&mut self, id: ConnectionId) -> Option<&mut LogicalConnection> {
        self.connections.get_mut(&id)
    }

    /// All current connection ids, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalConnection> {
        self.connections.values()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // Smallest-free scan: the first position whose id doesn't match its
    // index is a hole left by a removal. Linear, which is fine at the
    // connection counts a single transport carries; a free list would
    // replace this if that ever changes.
    fn allocate_id(&self) -> ConnectionId {
        let mut ids: Vec<u32> = self.connections.keys().map(|id| id.0).collect();
        ids.sort_unstable();

        for (index, id) in ids.iter().enumerate() {
            if *id != index as u32 {
                return ConnectionId(index as u32);
            }
        }
        ConnectionId(ids.len() as u32)
    }
}
