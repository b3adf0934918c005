//! Shared helpers for acceptance tests.

use std::sync::Arc;
use std::time::Duration;

use overpass_transport::{
    Driver, MemoryBroker, Role, TransportConfig, TransportEvent, SERVER_IDENTITY,
};

/// A loopback network: one server, N clients, one in-memory broker.
pub struct Loopback {
    pub broker: Arc<MemoryBroker>,
    pub server: Driver,
    pub clients: Vec<Driver>,
}

fn client_config(identity: &str) -> TransportConfig {
    TransportConfig::new(Role::Client, identity)
        .with_ping_interval(Duration::from_millis(25))
        .with_initial_ping_delay(Duration::ZERO)
}

impl Loopback {
    /// Start a network and pump until every driver finished bootstrap.
    pub async fn start(clients: usize) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let server_config = TransportConfig::new(Role::Server, SERVER_IDENTITY)
            .with_ping_interval(Duration::from_millis(25))
            .with_initial_ping_delay(Duration::ZERO);

        let mut net = Self {
            server: Driver::new(server_config, broker.clone()),
            clients: (0..clients)
                .map(|i| Driver::new(client_config(&format!("Client-{i}")), broker.clone()))
                .collect(),
            broker,
        };
        net.pump(10).await;
        assert!(net.server.is_ready());
        assert!(net.clients.iter().all(|c| c.is_ready()));
        net
    }

    /// Add one more client and pump until it is ready.
    pub async fn add_client(&mut self, identity: &str) -> usize {
        self.clients
            .push(Driver::new(client_config(identity), self.broker.clone()));
        self.pump(10).await;
        assert!(self.clients.last().unwrap().is_ready());
        self.clients.len() - 1
    }

    /// Tick every driver `rounds` times, yielding between ticks so spawned
    /// broker calls and deliveries complete.
    pub async fn pump(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.server.tick();
            for client in &mut self.clients {
                client.tick();
            }
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Pump with real sleeps between rounds, for heartbeat-timed scenarios.
    pub async fn pump_timed(&mut self, rounds: usize, step: Duration) {
        for _ in 0..rounds {
            self.pump(1).await;
            tokio::time::sleep(step).await;
        }
    }
}

/// Drain every queued event from a driver.
pub fn drain(driver: &mut Driver) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        match driver.next_event() {
            TransportEvent::Empty => break,
            event => events.push(event),
        }
    }
    events
}
