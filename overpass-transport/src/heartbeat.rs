//! Heartbeat: periodic RTT probing and dead-peer detection.
//!
//! The broker gives no "peer hung up" signal, so liveness is inferred: each
//! logical connection is pinged on a fixed interval once past an initial
//! settle delay, and a destination that accumulates too many unanswered
//! probes is declared dead and synthetically disconnected.
//!
//! The heartbeat performs no I/O. `tick` plans the pings to send as
//! [`PingRequest`]s and applies liveness disconnects directly to the table
//! and event queue; the driver turns requests into wire messages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use overpass_core::VirtualMessage;

use crate::config::TransportConfig;
use crate::events::{EventQueue, TransportEvent};
use crate::pending::PendingPingStore;
use crate::table::{ConnectionId, ConnectionTable};

/// A probe the driver should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    /// Connection being probed.
    pub connection: ConnectionId,
    /// Destination identity.
    pub destination: String,
    /// Logical port.
    pub port: i32,
    /// Fresh probe id.
    pub probe_id: u64,
}

/// A completed round-trip measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttSample {
    /// Destination that answered.
    pub destination: String,
    /// The matched probe id.
    pub probe_id: u64,
    /// Full round-trip time, measured locally.
    pub elapsed: Duration,
    /// Responder's reported outbound-leg latency, if it had one.
    pub remote_outbound_leg_ms: Option<i64>,
    /// Responder's reported return-leg latency, if it had one.
    pub remote_return_leg_ms: Option<i64>,
}

/// Periodic RTT probing and missed-heartbeat disconnect detection.
#[derive(Debug)]
pub struct PingHeartbeat {
    interval: Duration,
    initial_delay: Duration,
    miss_threshold: u32,
    pong_only: bool,
    pending: PendingPingStore,
    /// Last ping send per connection.
    last_ping: HashMap<ConnectionId, Instant>,
}

impl PingHeartbeat {
    /// Create the heartbeat for a transport configuration.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            interval: config.ping_interval,
            initial_delay: config.initial_ping_delay,
            miss_threshold: config.missed_ping_disconnect_threshold,
            pong_only: config.pong_only,
            pending: PendingPingStore::new(),
            last_ping: HashMap::new(),
        }
    }

    /// Run one heartbeat cycle.
    ///
    /// Destinations over the miss threshold are disconnected here (one
    /// Disconnect event, pendings dropped, table entry removed); everything
    /// else due for a probe gets a [`PingRequest`].
    pub fn tick(
        &mut self,
        now: Instant,
        table: &mut ConnectionTable,
        events: &mut EventQueue,
    ) -> Vec<PingRequest> {
        let mut pings = Vec::new();
        if self.pong_only {
            return pings;
        }

        for id in table.ids() {
            let (destination, port) = {
                let info = match table.get_info(id) {
                    Some(info) => info,
                    None => continue,
                };
                if info.age(now) < self.initial_delay {
                    continue;
                }
                (info.destination.clone(), info.port)
            };

            if let Some(last) = self.last_ping.get(&id) {
                if now.saturating_duration_since(*last) < self.interval {
                    continue;
                }
            }

            if self.pending.outstanding_for(&destination) >= self.miss_threshold as usize {
                let dropped = self.pending.drop_destination(&destination);
                self.last_ping.remove(&id);
                table.remove(id);
                events.push(TransportEvent::Disconnect { connection: id });
                tracing::info!(
                    connection = %id,
                    destination = %destination,
                    unanswered = dropped,
                    "Heartbeat timeout, peer disconnected"
                );
                continue;
            }

            let probe_id = self.pending.insert(&destination, now);
            self.last_ping.insert(id, now);
            pings.push(PingRequest {
                connection: id,
                destination,
                port,
                probe_id,
            });
        }
        pings
    }

    /// Handle a received Pong.
    ///
    /// A pong whose id is no longer pending (duplicate delivery, or a probe
    /// already written off) is a harmless no-op.
    pub fn on_pong(
        &mut self,
        now: Instant,
        message: &VirtualMessage,
        table: &mut ConnectionTable,
    ) -> Option<RttSample> {
        let fields = message.ping.as_ref()?;
        let ping = match self.pending.complete(fields.id, now) {
            Some(ping) => ping,
            None => {
                tracing::debug!(probe = fields.id, "Pong for unknown probe, ignoring");
                return None;
            }
        };

        let elapsed = now.saturating_duration_since(ping.sent_at);
        if let Some(id) = table.get(&message.source, message.port) {
            if let Some(info) = table.get_info_mut(id) {
                info.record_rtt(elapsed);
            }
        }

        tracing::debug!(
            destination = %ping.destination,
            probe = fields.id,
            rtt_ms = elapsed.as_millis() as u64,
            remote_outbound_ms = fields.outbound_leg_ms,
            remote_return_ms = fields.return_leg_ms,
            "RTT sample"
        );

        Some(RttSample {
            destination: ping.destination,
            probe_id: fields.id,
            elapsed,
            remote_outbound_leg_ms: fields.outbound_leg_ms,
            remote_return_leg_ms: fields.return_leg_ms,
        })
    }

    /// Register a single-shot probe outside any connection lifecycle.
    ///
    /// Available in pong-only mode; the reply is matched by [`Self::on_pong`]
    /// like any other.
    pub fn start_probe(&mut self, destination: &str, now: Instant) -> u64 {
        self.pending.insert(destination, now)
    }

    /// Forget all heartbeat state for a connection being torn down.
    pub fn forget(&mut self, id: ConnectionId, destination: &str) {
        self.last_ping.remove(&id);
        self.pending.drop_destination(destination);
    }

    /// Number of probes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
