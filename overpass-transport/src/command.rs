//! Command queue bridging async broker callbacks into the serial tick.
//!
//! Broker completions and deliveries arrive on arbitrary tasks. Nothing on
//! those tasks may touch transport state; instead every event becomes a
//! [`Command`] pushed through a cloneable [`CommandSender`]. The driver
//! drains the queue to empty exactly once per tick and dispatches each
//! command serially — the sole place where the connection table, bootstrap
//! flags and pending pings are mutated, which is what lets those structures
//! stay lock-free.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use overpass_core::WireMessage;

use crate::broker::{BrokerConsumerPtr, BrokerError, BrokerProducerPtr, BrokerResult};

/// Which send-side broker call a [`Command::SendCompleted`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOp {
    /// A message publish on the producer stream.
    Publish,
    /// A delivery acknowledgement on the consumer stream.
    Ack,
}

/// An event marshaled from a broker callback onto the tick.
pub enum Command {
    /// `list_topics` completed.
    TopicsListed(BrokerResult<Vec<String>>),
    /// `create_topic` completed.
    TopicCreated {
        /// The topic that was being created.
        topic: String,
        /// Call outcome.
        result: BrokerResult<()>,
    },
    /// `open_producer` completed.
    ProducerOpened(BrokerResult<BrokerProducerPtr>),
    /// `open_consumer` completed.
    ConsumerOpened(BrokerResult<BrokerConsumerPtr>),
    /// The consumer stream delivered a message.
    Inbound(WireMessage),
    /// A publish or acknowledge finished.
    SendCompleted {
        /// Which call finished.
        op: SendOp,
        /// Call outcome.
        result: BrokerResult<()>,
        /// Wall time the call took.
        elapsed: Duration,
    },
    /// The producer physical stream dropped.
    ProducerClosed {
        /// Why, as reported by the broker.
        reason: String,
    },
    /// The consumer physical stream dropped.
    ConsumerClosed {
        /// Why, as reported by the broker.
        reason: String,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::TopicsListed(result) => {
                write!(f, "TopicsListed({:?})", result.as_ref().map(|t| t.len()))
            }
            Command::TopicCreated { topic, result } => {
                write!(f, "TopicCreated({topic}, {:?})", result)
            }
            Command::ProducerOpened(result) => {
                write!(f, "ProducerOpened({})", outcome(result))
            }
            Command::ConsumerOpened(result) => {
                write!(f, "ConsumerOpened({})", outcome(result))
            }
            Command::Inbound(wire) => write!(f, "Inbound({})", wire.message_id),
            Command::SendCompleted { op, result, elapsed } => {
                write!(f, "SendCompleted({:?}, {}, {:?})", op, outcome(result), elapsed)
            }
            Command::ProducerClosed { reason } => write!(f, "ProducerClosed({reason})"),
            Command::ConsumerClosed { reason } => write!(f, "ConsumerClosed({reason})"),
        }
    }
}

fn outcome<T>(result: &Result<T, BrokerError>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("err: {e}"),
    }
}

/// Cheap-clone producer handle into the command queue.
///
/// Safe to use from any task or thread; sending never blocks.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Enqueue a command. Returns `false` if the driver has gone away.
    pub fn send(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            tracing::debug!("Command channel closed, dropping command");
            return false;
        }
        true
    }
}

/// The single-consumer side of the command queue, owned by the driver.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        // Unbounded so producer-side callbacks can never deadlock the tick.
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Get a cloneable sender handle.
    pub fn sender(&self) -> CommandSender {
        CommandSender { tx: self.tx.clone() }
    }

    /// Take the next queued command without waiting.
    pub fn try_next(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
