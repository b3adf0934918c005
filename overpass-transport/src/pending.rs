//! In-flight RTT probe tracking.

use std::collections::HashMap;
use std::time::Instant;

/// Name of the probe's outbound leg (us → peer).
pub const OUTBOUND_LEG: &str = "outbound";

/// Name of the probe's return leg (peer → us).
pub const RETURN_LEG: &str = "return";

/// Timing record for one leg of a probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingLeg {
    /// When the leg's message was sent.
    pub sent: Option<Instant>,
    /// When the leg's message was received.
    pub received: Option<Instant>,
}

/// One in-flight probe awaiting its pong.
#[derive(Debug, Clone)]
pub struct PendingPing {
    /// Probe id carried by the Ping and echoed by the Pong.
    pub id: u64,
    /// Destination the probe was sent to.
    pub destination: String,
    /// When the Ping was sent.
    pub sent_at: Instant,
    /// Per-leg timing records.
    pub legs: HashMap<&'static str, PingLeg>,
}

/// Tracks in-flight probes keyed by probe id.
///
/// Entries are created on ping send and removed on the matching pong;
/// entries that pile up for a destination signal a dead peer.
#[derive(Debug, Default)]
pub struct PendingPingStore {
    next_id: u64,
    pending: HashMap<u64, PendingPing>,
}

impl PendingPingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh probe to `destination` and return its id.
    pub fn insert(&mut self, destination: &str, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let mut legs = HashMap::new();
        legs.insert(
            OUTBOUND_LEG,
            PingLeg {
                sent: Some(now),
                received: None,
            },
        );
        legs.insert(RETURN_LEG, PingLeg::default());

        self.pending.insert(
            id,
            PendingPing {
                id,
                destination: destination.to_string(),
                sent_at: now,
                legs,
            },
        );
        id
    }

    /// Complete a probe by id, recording the return leg's arrival.
    ///
    /// Returns `None` when the id is not pending — a duplicate or stale pong
    /// under at-least-once delivery, which callers treat as a no-op.
    pub fn complete(&mut self, id: u64, now: Instant) -> Option<PendingPing> {
        let mut ping = self.pending.remove(&id)?;
        if let Some(leg) = ping.legs.get_mut(RETURN_LEG) {
            leg.received = Some(now);
        }
        Some(ping)
    }

    /// Number of unanswered probes for a destination.
    pub fn outstanding_for(&self, destination: &str) -> usize {
        self.pending
            .values()
            .filter(|p| p.destination == destination)
            .count()
    }

    /// Drop every probe addressed to a destination. Returns how many.
    pub fn drop_destination(&mut self, destination: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.destination != destination);
        before - self.pending.len()
    }

    /// Total number of in-flight probes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check whether no probes are in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
