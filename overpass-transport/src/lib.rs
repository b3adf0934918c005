//! Virtual-connection transport over a managed pub/sub broker.
//!
//! This crate fakes connection semantics (connect, data, disconnect) on top
//! of a backend that only offers pub/sub topics with at-least-once,
//! ack-required delivery and no "peer hung up" signal:
//!
//! - Many logical connections are multiplexed over exactly two physical
//!   streams per role (one producer, one consumer)
//! - Liveness and RTT come from application-level ping/pong heartbeats
//! - A bootstrap state machine provisions topics and streams in order
//! - An error-backoff policy keeps broker outages from becoming retry storms
//!
//! # Architecture
//!
//! Everything runs through one serial tick:
//!
//! ```text
//! Host loop                         Broker callbacks (any task)
//! ─────────                         ───────────────────────────
//! Driver::tick()                    deliveries / completions
//! ├── drain CommandQueue  ◄─────────── Command::*
//! ├── BootstrapStateMachine ──spawn──► provisioning calls
//! └── PingHeartbeat ──────────spawn──► publishes
//! ```
//!
//! Broker callbacks only ever enqueue commands; the connection table,
//! bootstrap flags and pending pings are touched exclusively inside the
//! drain, so none of them need locks.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use overpass_transport::{Driver, MemoryBroker, Role, TransportConfig};
//!
//! let broker = Arc::new(MemoryBroker::new());
//! let config = TransportConfig::new(Role::Client, "Client-1");
//! let mut driver = Driver::new(config, broker);
//!
//! loop {
//!     driver.tick();
//!     // drive next_event() / send() from the host here
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod bootstrap;
pub mod broker;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod pending;
pub mod table;

// Re-export main types
pub use backoff::ErrorBackoff;
pub use bootstrap::{BootstrapAction, BootstrapStateMachine};
pub use broker::memory::MemoryBroker;
pub use broker::{BrokerClient, BrokerClientPtr, BrokerConsumer, BrokerError, BrokerProducer};
pub use command::{Command, CommandQueue, CommandSender};
pub use config::{Role, TransportConfig, SERVER_IDENTITY};
pub use driver::{Driver, TransportHealth};
pub use error::{TransportError, TransportResult};
pub use events::{EventQueue, TransportEvent};
pub use heartbeat::{PingHeartbeat, RttSample};
pub use pending::{PendingPing, PendingPingStore};
pub use table::{ConnectionId, ConnectionTable, LogicalConnection};
