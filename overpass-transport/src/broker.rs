//! Broker abstraction.
//!
//! The managed pub/sub backend is an opaque, injected collaborator. The
//! transport only ever needs four provisioning calls plus a send and an
//! acknowledge, so the seam is three small dyn-compatible traits. Every
//! method is async and every call is issued fire-and-forget by the driver;
//! completions come back as [`Command`](crate::command::Command)s.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use overpass_core::{Ack, WireMessage};

use crate::command::CommandSender;

/// Errors surfaced by broker calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A provisioning or send call failed at the network level.
    #[error("broker call failed: {0}")]
    Call(String),

    /// The connection to the broker was lost.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    /// The referenced topic does not exist.
    #[error("no such topic: {0}")]
    NoSuchTopic(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Shared handle to an open producer stream.
pub type BrokerProducerPtr = Arc<dyn BrokerProducer>;

/// Shared handle to an open consumer stream.
pub type BrokerConsumerPtr = Arc<dyn BrokerConsumer>;

/// Shared handle to a broker client.
pub type BrokerClientPtr = Arc<dyn BrokerClient>;

/// The backend's provisioning surface.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// List the currently existing topics.
    async fn list_topics(&self) -> BrokerResult<Vec<String>>;

    /// Create a topic. Creating an existing topic is not an error.
    async fn create_topic(&self, topic: &str) -> BrokerResult<()>;

    /// Open the producer physical stream on a topic.
    async fn open_producer(&self, topic: &str) -> BrokerResult<BrokerProducerPtr>;

    /// Open the consumer physical stream on a topic.
    ///
    /// Deliveries are pushed into `inbox` as
    /// [`Command::Inbound`](crate::command::Command::Inbound); stream loss is
    /// reported as [`Command::ConsumerClosed`](crate::command::Command::ConsumerClosed).
    async fn open_consumer(
        &self,
        topic: &str,
        subscription: &str,
        inbox: CommandSender,
    ) -> BrokerResult<BrokerConsumerPtr>;
}

/// An open producer stream.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Publish one wire message.
    async fn send(&self, message: &WireMessage) -> BrokerResult<()>;
}

/// An open consumer stream.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Acknowledge a delivery, suppressing its redelivery.
    async fn acknowledge(&self, ack: &Ack) -> BrokerResult<()>;
}
