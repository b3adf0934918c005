//! Outward event surface consumed by the host integration layer.

use std::collections::VecDeque;
use std::fmt;

use crate::table::ConnectionId;

/// An event reported to the host transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A logical connection came up.
    Connect {
        /// The connection's id.
        connection: ConnectionId,
    },
    /// Payload arrived on a logical connection.
    Data {
        /// The connection's id.
        connection: ConnectionId,
        /// The payload bytes.
        payload: Vec<u8>,
    },
    /// A logical connection went away (explicit or liveness timeout).
    Disconnect {
        /// The connection's id.
        connection: ConnectionId,
    },
    /// Nothing queued; the sentinel returned by an empty pop.
    Empty,
}

impl TransportEvent {
    /// Get a human-readable name for the event.
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connect { .. } => "connect",
            TransportEvent::Data { .. } => "data",
            TransportEvent::Disconnect { .. } => "disconnect",
            TransportEvent::Empty => "empty",
        }
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Data { connection, payload } => {
                write!(f, "data({}, {} bytes)", connection, payload.len())
            }
            TransportEvent::Connect { connection } => write!(f, "connect({})", connection),
            TransportEvent::Disconnect { connection } => write!(f, "disconnect({})", connection),
            TransportEvent::Empty => write!(f, "empty"),
        }
    }
}

/// FIFO of transport events. Never blocks.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<TransportEvent>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    /// Pop the oldest event, or [`TransportEvent::Empty`] when none queued.
    pub fn pop(&mut self) -> TransportEvent {
        self.events.pop_front().unwrap_or(TransportEvent::Empty)
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = EventQueue::new();
        queue.push(TransportEvent::Connect { connection: ConnectionId(0) });
        queue.push(TransportEvent::Data {
            connection: ConnectionId(0),
            payload: vec![1],
        });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().name(), "connect");
        assert_eq!(queue.pop().name(), "data");
    }

    #[test]
    fn test_empty_pop_returns_sentinel() {
        let mut queue = EventQueue::new();
        assert_eq!(queue.pop(), TransportEvent::Empty);
        assert_eq!(queue.pop(), TransportEvent::Empty);
    }
}
