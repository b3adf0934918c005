//! Transport driver.
//!
//! The driver ties the transport together in one per-tick control loop. The
//! host calls [`Driver::tick`] once per external frame; the tick drains the
//! command queue, advances bootstrap while resources are still coming up,
//! and otherwise runs the heartbeat. Broker I/O never happens inline —
//! every call is spawned fire-and-forget and reports back as a command.
//!
//! The driver must be driven from within a tokio runtime.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use overpass_core::{decode, encode, Ack, MessageKind, PingFields, VirtualMessage, WireMessage};

use crate::backoff::ErrorBackoff;
use crate::bootstrap::{BootstrapAction, BootstrapStateMachine};
use crate::broker::{BrokerClientPtr, BrokerConsumerPtr, BrokerError, BrokerProducerPtr};
use crate::command::{Command, CommandQueue, CommandSender, SendOp};
use crate::config::{Role, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::events::{EventQueue, TransportEvent};
use crate::heartbeat::PingHeartbeat;
use crate::table::{ConnectionId, ConnectionTable};

/// Point-in-time health snapshot for operators.
///
/// Sustained broker failure never crashes the transport; it shows up here as
/// a climbing error count and pause instead.
#[derive(Debug, Clone)]
pub struct TransportHealth {
    /// Whether broker resources are provisioned and both streams are open.
    pub setup_complete: bool,
    /// Number of live logical connections.
    pub connections: usize,
    /// Consecutive failed broker calls.
    pub consecutive_errors: u32,
    /// The pause the backoff policy is currently at.
    pub current_pause: Duration,
    /// Whether the driver is sitting out ticks right now.
    pub paused: bool,
}

/// Composition root of the transport.
pub struct Driver {
    config: TransportConfig,
    broker: BrokerClientPtr,
    commands: CommandQueue,
    table: ConnectionTable,
    bootstrap: BootstrapStateMachine,
    heartbeat: PingHeartbeat,
    backoff: ErrorBackoff,
    events: EventQueue,
    producer: Option<BrokerProducerPtr>,
    consumer: Option<BrokerConsumerPtr>,
    /// Last measured publish latency, fed to pong replies.
    last_publish_ms: Option<i64>,
    /// Last measured acknowledge latency, fed to pong replies.
    last_ack_ms: Option<i64>,
    /// Latest single-shot probe result per destination.
    probe_results: HashMap<String, Duration>,
}

impl Driver {
    /// Create a driver for the given configuration and broker.
    pub fn new(config: TransportConfig, broker: BrokerClientPtr) -> Self {
        let bootstrap = BootstrapStateMachine::new(&config);
        let heartbeat = PingHeartbeat::new(&config);
        let backoff = ErrorBackoff::from_config(&config);

        tracing::info!(
            role = %config.role,
            identity = %config.identity,
            "Transport driver created"
        );

        Self {
            config,
            broker,
            commands: CommandQueue::new(),
            table: ConnectionTable::new(),
            bootstrap,
            heartbeat,
            backoff,
            events: EventQueue::new(),
            producer: None,
            consumer: None,
            last_publish_ms: None,
            last_ack_ms: None,
            probe_results: HashMap::new(),
        }
    }

    /// Run one tick of the transport.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Run one tick at an explicit instant (deterministic for tests).
    pub fn tick_at(&mut self, now: Instant) {
        self.drain_commands(now);

        if self.backoff.is_paused(now) {
            return;
        }
        if !self.bootstrap.is_complete() {
            self.advance_bootstrap();
            return;
        }
        if self.config.ping_enabled {
            self.run_heartbeat(now);
        }
    }

    // ------------------------------------------------------------------
    // Host transport adapter
    // ------------------------------------------------------------------

    /// Open a logical connection to a peer. Idempotent per (peer, port).
    pub fn connect(&mut self, destination: &str, port: i32) -> TransportResult<ConnectionId> {
        if !self.bootstrap.is_complete() {
            return Err(TransportError::NotReady);
        }
        let id = self
            .table
            .add_or_get(&self.config.identity, destination, port, Instant::now());
        self.send_message(&VirtualMessage::connect(&self.config.identity, destination, port));
        Ok(id)
    }

    /// Close a logical connection, notifying the peer.
    pub fn disconnect(&mut self, id: ConnectionId) -> TransportResult<()> {
        let info = self
            .table
            .remove(id)
            .ok_or(TransportError::UnknownConnection(id))?;
        self.heartbeat.forget(id, &info.destination);
        self.send_message(&VirtualMessage::disconnect(
            &self.config.identity,
            &info.destination,
            info.port,
        ));
        Ok(())
    }

    /// Send payload bytes on a logical connection.
    pub fn send(&mut self, id: ConnectionId, payload: &[u8]) -> TransportResult<()> {
        if self.producer.is_none() {
            return Err(TransportError::NotReady);
        }
        let (destination, port) = {
            let info = self
                .table
                .get_info_mut(id)
                .ok_or(TransportError::UnknownConnection(id))?;
            info.record_send(Instant::now());
            (info.destination.clone(), info.port)
        };
        self.send_message(&VirtualMessage::data(
            &self.config.identity,
            &destination,
            port,
            payload.to_vec(),
        ));
        Ok(())
    }

    /// Pop the next transport event, or [`TransportEvent::Empty`].
    pub fn next_event(&mut self) -> TransportEvent {
        self.events.pop()
    }

    /// Fire a single-shot RTT probe outside any connection lifecycle.
    ///
    /// The result lands in [`Self::probe_result`] once the pong returns.
    pub fn probe(&mut self, destination: &str, port: i32) -> TransportResult<u64> {
        if self.producer.is_none() {
            return Err(TransportError::NotReady);
        }
        let probe_id = self.heartbeat.start_probe(destination, Instant::now());
        self.send_message(&VirtualMessage::ping(
            &self.config.identity,
            destination,
            port,
            probe_id,
        ));
        Ok(probe_id)
    }

    /// Latest probe result for a destination.
    pub fn probe_result(&self, destination: &str) -> Option<Duration> {
        self.probe_results.get(destination).copied()
    }

    /// Last measured RTT on a logical connection.
    pub fn rtt(&self, id: ConnectionId) -> Option<Duration> {
        self.table.get_info(id).and_then(|info| info.last_rtt)
    }

    /// Send Disconnect for every live connection and drop them.
    pub fn shutdown(&mut self) {
        tracing::info!(connections = self.table.len(), "Shutting down transport");
        for id in self.table.ids() {
            let _ = self.disconnect(id);
        }
    }

    /// Health snapshot at the current instant.
    pub fn health(&self) -> TransportHealth {
        self.health_at(Instant::now())
    }

    /// Health snapshot at an explicit instant.
    pub fn health_at(&self, now: Instant) -> TransportHealth {
        TransportHealth {
            setup_complete: self.bootstrap.is_complete(),
            connections: self.table.len(),
            consecutive_errors: self.backoff.consecutive_errors(),
            current_pause: self.backoff.current_pause(),
            paused: self.backoff.is_paused(now),
        }
    }

    /// Check whether bootstrap has finished.
    pub fn is_ready(&self) -> bool {
        self.bootstrap.is_complete()
    }

    /// This node's identity.
    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// This instance's role.
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Number of live logical connections.
    pub fn connections(&self) -> usize {
        self.table.len()
    }

    /// Handle into the command queue, for broker implementations and tests.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    // ------------------------------------------------------------------
    // Serial dispatch
    // ------------------------------------------------------------------

    fn drain_commands(&mut self, now: Instant) {
        while let Some(command) = self.commands.try_next() {
            self.dispatch(command, now);
        }
    }

    fn dispatch(&mut self, command: Command, now: Instant) {
        match command {
            Command::TopicsListed(Ok(topics)) => {
                self.backoff.record_success();
                self.bootstrap.on_topics_listed(&topics);
            }
            Command::TopicsListed(Err(e)) => self.step_failed("list_topics", e, now),

            Command::TopicCreated { topic, result } => match result {
                Ok(()) => {
                    self.backoff.record_success();
                    self.bootstrap.on_topic_created(&topic);
                }
                Err(e) => self.step_failed("create_topic", e, now),
            },

            Command::ProducerOpened(Ok(producer)) => {
                self.backoff.record_success();
                self.producer = Some(producer);
                self.bootstrap.on_producer_opened();
                // Warm the fresh stream; receivers ack this and drop it.
                self.send_wire(encode(&VirtualMessage::dummy(&self.config.identity)));
                self.finish_bootstrap(now);
            }
            Command::ProducerOpened(Err(e)) => self.step_failed("open_producer", e, now),

            Command::ConsumerOpened(Ok(consumer)) => {
                self.backoff.record_success();
                self.consumer = Some(consumer);
                self.bootstrap.on_consumer_opened();
                self.finish_bootstrap(now);
            }
            Command::ConsumerOpened(Err(e)) => self.step_failed("open_consumer", e, now),

            Command::Inbound(wire) => self.handle_inbound(wire, now),

            Command::SendCompleted { op, result, elapsed } => match result {
                Ok(()) => {
                    self.backoff.record_success();
                    let ms = elapsed.as_millis() as i64;
                    match op {
                        SendOp::Publish => self.last_publish_ms = Some(ms),
                        SendOp::Ack => self.last_ack_ms = Some(ms),
                    }
                }
                Err(e) => {
                    tracing::warn!(op = ?op, error = %e, "Send-side broker call failed");
                    self.backoff.record_failure(now);
                }
            },

            Command::ProducerClosed { reason } => {
                tracing::warn!(reason = %reason, "Producer stream closed");
                self.producer = None;
                self.bootstrap.on_producer_closed();
            }
            Command::ConsumerClosed { reason } => {
                tracing::warn!(reason = %reason, "Consumer stream closed");
                self.consumer = None;
                self.bootstrap.on_consumer_closed();
            }
        }
    }

    fn step_failed(&mut self, call: &'static str, error: BrokerError, now: Instant) {
        tracing::warn!(call, error = %error, "Provisioning call failed, will retry");
        self.bootstrap.on_step_failed();
        self.backoff.record_failure(now);
    }

    /// Runs once per completed bootstrap: the client announces itself to the
    /// well-known server identity.
    fn finish_bootstrap(&mut self, now: Instant) {
        if !self.bootstrap.try_complete() {
            return;
        }
        if self.config.role != Role::Client || self.config.pong_only {
            return;
        }

        let server = self.config.server_identity.clone();
        let already_known = self.table.get(&server, 0).is_some();
        let id = self.table.add_or_get(&self.config.identity, &server, 0, now);
        self.send_message(&VirtualMessage::connect(&self.config.identity, &server, 0));
        if !already_known {
            self.events.push(TransportEvent::Connect { connection: id });
            tracing::info!(connection = %id, server = %server, "Connected to server");
        }
    }

    // ------------------------------------------------------------------
    // Inbound traffic
    // ------------------------------------------------------------------

    fn handle_inbound(&mut self, wire: WireMessage, now: Instant) {
        let message = match decode(&wire) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(message_id = %wire.message_id, error = %e, "Undecodable message dropped");
                return;
            }
        };

        // At-least-once contract: everything parsed is acked, addressed to
        // us or not, so the broker stops redelivering it.
        self.acknowledge(&wire);

        if message.destination != self.config.identity {
            // Fan-out from the shared topic; someone else's traffic.
            tracing::trace!(message = %message, "Not addressed to us, ignoring");
            return;
        }

        match message.kind {
            MessageKind::Connect => self.handle_connect(&message, now),
            MessageKind::Data => self.handle_data(message, now),
            MessageKind::Disconnect => self.handle_disconnect(&message),
            MessageKind::Ping => self.handle_ping(&message),
            MessageKind::Pong => {
                if let Some(sample) = self.heartbeat.on_pong(now, &message, &mut self.table) {
                    self.probe_results.insert(sample.destination.clone(), sample.elapsed);
                }
            }
            MessageKind::Internal | MessageKind::Dummy => {}
        }
    }

    fn handle_connect(&mut self, message: &VirtualMessage, now: Instant) {
        let already_known = self.table.get(&message.source, message.port).is_some();
        let id = self
            .table
            .add_or_get(&self.config.identity, &message.source, message.port, now);

        if already_known {
            // At-least-once redelivery; the connection already exists.
            tracing::debug!(connection = %id, "Duplicate connect, ignoring");
            return;
        }
        self.events.push(TransportEvent::Connect { connection: id });
        tracing::info!(connection = %id, peer = %message.source, "Peer connected");
    }

    fn handle_data(&mut self, message: VirtualMessage, now: Instant) {
        match self.table.get(&message.source, message.port) {
            Some(id) => {
                if let Some(info) = self.table.get_info_mut(id) {
                    info.record_recv(now);
                }
                self.events.push(TransportEvent::Data {
                    connection: id,
                    payload: message.payload,
                });
            }
            None => {
                // Unknown peer: normal under fan-out, not a failure.
                tracing::trace!(message = %message, "Data for unknown peer, ignoring");
            }
        }
    }

    fn handle_disconnect(&mut self, message: &VirtualMessage) {
        if let Some(id) = self.table.get(&message.source, message.port) {
            if let Some(info) = self.table.remove(id) {
                self.heartbeat.forget(id, &info.destination);
            }
            self.events.push(TransportEvent::Disconnect { connection: id });
            tracing::info!(connection = %id, peer = %message.source, "Peer disconnected");
        }
    }

    fn handle_ping(&mut self, message: &VirtualMessage) {
        let fields = match &message.ping {
            Some(fields) => fields,
            None => return,
        };
        let reply = VirtualMessage::pong(
            &self.config.identity,
            &message.source,
            message.port,
            PingFields {
                id: fields.id,
                outbound_leg_ms: self.last_publish_ms,
                return_leg_ms: self.last_ack_ms,
                origin: fields.origin.clone(),
            },
        );
        self.send_message(&reply);
    }

    // ------------------------------------------------------------------
    // Bootstrap and heartbeat execution
    // ------------------------------------------------------------------

    fn advance_bootstrap(&mut self) {
        let action = match self.bootstrap.next_action() {
            Some(action) => action,
            None => return,
        };
        self.bootstrap.mark_waiting();

        let broker = self.broker.clone();
        let tx = self.commands.sender();

        match action {
            BootstrapAction::ListTopics => {
                tokio::spawn(async move {
                    tx.send(Command::TopicsListed(broker.list_topics().await));
                });
            }
            BootstrapAction::CreateTopic(topic) => {
                tokio::spawn(async move {
                    let result = broker.create_topic(&topic).await;
                    tx.send(Command::TopicCreated { topic, result });
                });
            }
            BootstrapAction::OpenProducer(topic) => {
                tokio::spawn(async move {
                    tx.send(Command::ProducerOpened(broker.open_producer(&topic).await));
                });
            }
            BootstrapAction::OpenConsumer { topic, subscription } => {
                let inbox = self.commands.sender();
                tokio::spawn(async move {
                    tx.send(Command::ConsumerOpened(
                        broker.open_consumer(&topic, &subscription, inbox).await,
                    ));
                });
            }
        }
    }

    fn run_heartbeat(&mut self, now: Instant) {
        let pings = self.heartbeat.tick(now, &mut self.table, &mut self.events);
        for ping in pings {
            self.send_message(&VirtualMessage::ping(
                &self.config.identity,
                &ping.destination,
                ping.port,
                ping.probe_id,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Outbound plumbing
    // ------------------------------------------------------------------

    fn send_message(&mut self, message: &VirtualMessage) {
        tracing::trace!(message = %message, "Sending");
        self.send_wire(encode(message));
    }

    fn send_wire(&mut self, wire: WireMessage) {
        let producer = match &self.producer {
            Some(producer) => producer.clone(),
            None => {
                tracing::debug!("No producer stream, dropping outbound message");
                return;
            }
        };
        let tx = self.commands.sender();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = producer.send(&wire).await;
            tx.send(Command::SendCompleted {
                op: SendOp::Publish,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    fn acknowledge(&mut self, wire: &WireMessage) {
        if wire.message_id.is_empty() {
            return;
        }
        let consumer = match &self.consumer {
            Some(consumer) => consumer.clone(),
            None => return,
        };
        let ack = Ack::for_message(wire);
        let tx = self.commands.sender();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = consumer.acknowledge(&ack).await;
            tx.send(Command::SendCompleted {
                op: SendOp::Ack,
                result,
                elapsed: started.elapsed(),
            });
        });
    }
}
