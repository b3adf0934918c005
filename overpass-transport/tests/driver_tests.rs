//! End-to-end driver scenarios over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use overpass_core::{encode, VirtualMessage};
use overpass_transport::{
    BrokerClient, Command, ConnectionId, Driver, MemoryBroker, Role, TransportConfig,
    TransportEvent, SERVER_IDENTITY,
};

/// A server and N clients sharing one in-memory broker.
struct TestNet {
    broker: Arc<MemoryBroker>,
    server: Driver,
    clients: Vec<Driver>,
}

impl TestNet {
    fn new(client_configs: Vec<TransportConfig>) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        broker.seed_topic("overpass-to-server");
        broker.seed_topic("overpass-to-clients");

        let server_config =
            TransportConfig::new(Role::Server, SERVER_IDENTITY).with_ping_enabled(false);
        let server = Driver::new(server_config, broker.clone());
        let clients = client_configs
            .into_iter()
            .map(|config| Driver::new(config, broker.clone()))
            .collect();

        Self { broker, server, clients }
    }

    fn one_client() -> Self {
        Self::new(vec![
            TransportConfig::new(Role::Client, "Client-1").with_ping_enabled(false),
        ])
    }

    /// Tick every driver `rounds` times, yielding so spawned broker calls
    /// and deliveries complete between ticks.
    async fn pump(&mut self, rounds: usize) {
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
    async fn pump_timed(&mut self, rounds: usize, step: Duration) {
        for _ in 0..rounds {
            self.pump(1).await;
            tokio::time::sleep(step).await;
        }
    }
}

fn drain(driver: &mut Driver) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        match driver.next_event() {
            TransportEvent::Empty => break,
            event => events.push(event),
        }
    }
    events
}

#[tokio::test]
async fn test_client_bootstrap_with_existing_topics() {
    let mut net = TestNet::one_client();
    net.pump(8).await;

    assert!(net.server.is_ready());
    assert!(net.clients[0].is_ready());

    // The client announced itself exactly once.
    let server_events = drain(&mut net.server);
    let connects: Vec<_> = server_events
        .iter()
        .filter(|e| matches!(e, TransportEvent::Connect { .. }))
        .collect();
    assert_eq!(connects.len(), 1);
    assert_eq!(net.server.connections(), 1);

    // The client surfaced its side of the connection.
    let client_events = drain(&mut net.clients[0]);
    assert!(matches!(
        client_events.as_slice(),
        [TransportEvent::Connect { .. }]
    ));
    assert_eq!(net.clients[0].connections(), 1);
}

#[tokio::test]
async fn test_bootstrap_creates_missing_topics() {
    let broker = Arc::new(MemoryBroker::new());
    let config = TransportConfig::new(Role::Client, "Client-1").with_ping_enabled(false);
    let mut driver = Driver::new(config, broker.clone());

    for _ in 0..10 {
        driver.tick();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    assert!(driver.is_ready());
    let mut topics = broker.list_topics().await.unwrap();
    topics.sort();
    assert_eq!(topics, vec!["overpass-to-clients", "overpass-to-server"]);
}

#[tokio::test]
async fn test_data_roundtrip() {
    let mut net = TestNet::one_client();
    net.pump(8).await;

    let client_conn = match drain(&mut net.clients[0]).as_slice() {
        [TransportEvent::Connect { connection }] => *connection,
        other => panic!("unexpected client events: {:?}", other),
    };
    let server_conn = match drain(&mut net.server).as_slice() {
        [TransportEvent::Connect { connection }] => *connection,
        other => panic!("unexpected server events: {:?}", other),
    };

    net.clients[0].send(client_conn, b"hello").unwrap();
    net.pump(3).await;
    assert_eq!(
        drain(&mut net.server),
        vec![TransportEvent::Data {
            connection: server_conn,
            payload: b"hello".to_vec(),
        }]
    );

    net.server.send(server_conn, b"world").unwrap();
    net.pump(3).await;
    assert_eq!(
        drain(&mut net.clients[0]),
        vec![TransportEvent::Data {
            connection: client_conn,
            payload: b"world".to_vec(),
        }]
    );
}

#[tokio::test]
async fn test_duplicate_connect_is_idempotent() {
    let mut net = TestNet::one_client();
    net.pump(8).await;
    drain(&mut net.server);

    // At-least-once redelivery of the client's Connect.
    let mut wire = encode(&VirtualMessage::connect("Client-1", SERVER_IDENTITY, 0));
    wire.message_id = "redelivered-connect".to_string();
    net.server.command_sender().send(Command::Inbound(wire));
    net.pump(2).await;

    assert!(drain(&mut net.server).is_empty());
    assert_eq!(net.server.connections(), 1);
}

#[tokio::test]
async fn test_data_for_unknown_peer_is_discarded() {
    let mut net = TestNet::one_client();
    net.pump(8).await;
    drain(&mut net.server);

    let mut wire = encode(&VirtualMessage::data("Phantom", SERVER_IDENTITY, 9, vec![1, 2]));
    wire.message_id = "phantom-data".to_string();
    net.server.command_sender().send(Command::Inbound(wire));
    net.pump(2).await;

    // No event, and nothing counted toward backoff.
    assert!(drain(&mut net.server).is_empty());
    assert_eq!(net.server.health().consecutive_errors, 0);
}

#[tokio::test]
async fn test_traffic_not_addressed_to_us_is_ignored() {
    let mut net = TestNet::one_client();
    net.pump(8).await;
    drain(&mut net.clients[0]);

    // Fan-out: another client's traffic shows up on the shared topic.
    let mut wire = encode(&VirtualMessage::data(SERVER_IDENTITY, "Client-2", 0, vec![9]));
    wire.message_id = "other-clients".to_string();
    net.clients[0].command_sender().send(Command::Inbound(wire));
    net.pump(2).await;

    assert!(drain(&mut net.clients[0]).is_empty());
    assert_eq!(net.clients[0].health().consecutive_errors, 0);
}

#[tokio::test]
async fn test_provisioning_failures_pause_the_driver() {
    let broker = Arc::new(MemoryBroker::new());
    let config = TransportConfig::new(Role::Client, "Client-1")
        .with_ping_enabled(false)
        .with_error_backoff(Duration::from_millis(200), 2.0, 3);
    let mut driver = Driver::new(config, broker.clone());

    broker.set_fail_provisioning(true);
    for _ in 0..6 {
        driver.tick();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    let health = driver.health();
    assert!(!health.setup_complete);
    assert!(health.paused);
    assert_eq!(health.consecutive_errors, 3);

    // Paused ticks issue no further calls, so the count stays put.
    driver.tick();
    driver.tick();
    assert_eq!(driver.health().consecutive_errors, 3);

    // Past the pause, with the broker healthy again, bootstrap finishes and
    // one success resets the backoff.
    broker.set_fail_provisioning(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    for _ in 0..10 {
        driver.tick();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    let health = driver.health();
    assert!(health.setup_complete);
    assert_eq!(health.consecutive_errors, 0);
    assert!(!health.paused);
}

#[tokio::test]
async fn test_heartbeat_disconnects_silent_peer() {
    let mut net = TestNet::new(vec![TransportConfig::new(Role::Client, "Client-1")
        .with_ping_interval(Duration::from_millis(30))
        .with_initial_ping_delay(Duration::ZERO)
        .with_missed_ping_disconnect_threshold(2)]);
    net.pump(8).await;
    drain(&mut net.clients[0]);

    // A peer that will never answer a single ping.
    let ghost = net.clients[0].connect("Ghost", 1).unwrap();
    assert_eq!(net.clients[0].connections(), 2);

    net.pump_timed(8, Duration::from_millis(35)).await;

    let disconnects: Vec<_> = drain(&mut net.clients[0])
        .into_iter()
        .filter(|e| matches!(e, TransportEvent::Disconnect { .. }))
        .collect();
    assert_eq!(disconnects, vec![TransportEvent::Disconnect { connection: ghost }]);

    // The server kept answering, so only the ghost is gone.
    assert_eq!(net.clients[0].connections(), 1);
    assert!(net.clients[0].rtt(ConnectionId(0)).is_some());
}

#[tokio::test]
async fn test_server_initiated_disconnect() {
    let mut net = TestNet::one_client();
    net.pump(8).await;

    let client_conn = match drain(&mut net.clients[0]).as_slice() {
        [TransportEvent::Connect { connection }] => *connection,
        other => panic!("unexpected client events: {:?}", other),
    };
    let server_conn = match drain(&mut net.server).as_slice() {
        [TransportEvent::Connect { connection }] => *connection,
        other => panic!("unexpected server events: {:?}", other),
    };

    net.server.disconnect(server_conn).unwrap();
    net.pump(3).await;

    assert_eq!(net.server.connections(), 0);
    assert_eq!(
        drain(&mut net.clients[0]),
        vec![TransportEvent::Disconnect { connection: client_conn }]
    );
    assert_eq!(net.clients[0].connections(), 0);
}

#[tokio::test]
async fn test_pong_only_probe() {
    let mut net = TestNet::new(vec![TransportConfig::new(Role::Client, "Client-1")
        .with_pong_only(true)]);
    net.pump(8).await;
    assert!(net.clients[0].is_ready());

    // Pong-only mode skips the connection lifecycle entirely.
    assert_eq!(net.clients[0].connections(), 0);
    assert!(drain(&mut net.server).is_empty());

    net.clients[0].probe(SERVER_IDENTITY, 0).unwrap();
    net.pump(4).await;

    let rtt = net.clients[0].probe_result(SERVER_IDENTITY);
    assert!(rtt.is_some());
}

#[tokio::test]
async fn test_consumer_loss_triggers_reopen() {
    let mut net = TestNet::one_client();
    net.pump(8).await;
    assert!(net.clients[0].is_ready());

    net.clients[0].command_sender().send(Command::ConsumerClosed {
        reason: "stream reset".to_string(),
    });
    net.pump(1).await;
    assert!(!net.clients[0].is_ready());

    net.pump(6).await;
    assert!(net.clients[0].is_ready());
}

#[tokio::test]
async fn test_unacked_redelivery_is_survivable() {
    let mut net = TestNet::one_client();
    net.pump(8).await;
    drain(&mut net.server);

    // Force everything still unacked back through the pipe; acks race the
    // redelivery here, which is exactly the at-least-once world.
    net.broker.redeliver_overdue(std::time::Instant::now() + Duration::from_secs(10));
    net.pump(3).await;

    // Redelivered Connects change nothing.
    assert!(drain(&mut net.server).is_empty());
    assert_eq!(net.server.connections(), 1);
}
