//! Node orchestrator.
//!
//! Runs a loopback network: one server driver and N client drivers sharing
//! an in-memory broker, all ticked from a single interval. Clients greet the
//! server as soon as their connection comes up; the server echoes every
//! payload back; the tick loop periodically reports health and measured RTT.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval, MissedTickBehavior};

use overpass_transport::{ConnectionId, Driver, MemoryBroker, TransportEvent};

use crate::config::NodeConfig;
use crate::shutdown::wait_for_shutdown_signal;

/// Ticks between health reports.
const REPORT_EVERY_TICKS: u64 = 40;

/// The main node structure.
pub struct Node {
    config: NodeConfig,
}

impl Node {
    /// Create a new node with the given configuration.
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Run the loopback network until the duration elapses or a shutdown
    /// signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            clients = self.config.clients,
            tick_ms = self.config.tick.as_millis() as u64,
            "Starting loopback network"
        );

        let broker = Arc::new(MemoryBroker::new());
        let mut server = Driver::new(self.config.server_config(), broker.clone());
        let mut clients: Vec<Driver> = (0..self.config.clients)
            .map(|index| Driver::new(self.config.client_config(index), broker.clone()))
            .collect();

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut ticks: u64 = 0;

        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                _ = ticker.tick() => {
                    server.tick();
                    for client in &mut clients {
                        client.tick();
                    }
                    broker.redeliver_overdue(Instant::now());

                    Self::drive_server(&mut server);
                    for client in &mut clients {
                        Self::drive_client(client);
                    }

                    ticks += 1;
                    if ticks % REPORT_EVERY_TICKS == 0 {
                        Self::report(&server, &clients);
                    }

                    if let Some(duration) = self.config.duration {
                        if started.elapsed() >= duration {
                            tracing::info!("Run duration elapsed");
                            break;
                        }
                    }
                }
            }
        }

        // Tear the logical connections down before exiting.
        for client in &mut clients {
            client.shutdown();
        }
        server.shutdown();
        tracing::info!("Loopback network stopped");
        Ok(())
    }

    /// Server behavior: echo every payload back to its sender.
    fn drive_server(server: &mut Driver) {
        loop {
            match server.next_event() {
                TransportEvent::Empty => break,
                TransportEvent::Connect { connection } => {
                    tracing::info!(connection = %connection, "Server: client connected");
                }
                TransportEvent::Data { connection, payload } => {
                    if let Err(e) = server.send(connection, &payload) {
                        tracing::warn!(connection = %connection, error = %e, "Echo failed");
                    }
                }
                TransportEvent::Disconnect { connection } => {
                    tracing::info!(connection = %connection, "Server: client disconnected");
                }
            }
        }
    }

    /// Client behavior: greet on connect, then keep one echo in flight.
    fn drive_client(client: &mut Driver) {
        loop {
            match client.next_event() {
                TransportEvent::Empty => break,
                TransportEvent::Connect { connection } => {
                    let greeting = format!("hello from {}", client.identity());
                    if let Err(e) = client.send(connection, greeting.as_bytes()) {
                        tracing::warn!(connection = %connection, error = %e, "Greeting failed");
                    }
                }
                TransportEvent::Data { connection, payload } => {
                    tracing::debug!(
                        connection = %connection,
                        bytes = payload.len(),
                        "Echo received"
                    );
                    if let Err(e) = client.send(connection, &payload) {
                        tracing::warn!(connection = %connection, error = %e, "Re-send failed");
                    }
                }
                TransportEvent::Disconnect { connection } => {
                    tracing::info!(connection = %connection, "Client: disconnected");
                }
            }
        }
    }

    fn report(server: &Driver, clients: &[Driver]) {
        let health = server.health();
        tracing::info!(
            connections = health.connections,
            errors = health.consecutive_errors,
            paused = health.paused,
            "Server health"
        );

        for client in clients {
            // A loopback client's only connection is its server link, id 0.
            if let Some(rtt) = client.rtt(ConnectionId(0)) {
                tracing::info!(
                    client = %client.identity(),
                    rtt_ms = rtt.as_millis() as u64,
                    "Measured RTT to server"
                );
            }
        }
    }
}
