//! Virtual message kinds and the transport envelope.
//!
//! A [`VirtualMessage`] is the unit of traffic between two logical peers.
//! Many logical connections are multiplexed over the same pair of physical
//! broker streams; the `(source, destination, port)` triple addresses the
//! logical connection a message belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// The kind of a virtual message.
///
/// The numeric values are the wire contract (the `t` property) and must not
/// be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    /// A peer announces a new logical connection.
    Connect,
    /// Application payload on an established logical connection.
    Data,
    /// A peer tears down a logical connection.
    Disconnect,
    /// Liveness and RTT probe.
    Ping,
    /// Reply to a probe, echoing its id.
    Pong,
    /// Reserved for transport-internal control traffic.
    Internal,
    /// Stream warm-up filler; carries no meaning and is dropped on receipt.
    Dummy,
}

impl MessageKind {
    /// Get a human-readable name for the message kind.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Data => "data",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Internal => "internal",
            MessageKind::Dummy => "dummy",
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        match kind {
            MessageKind::Connect => 0,
            MessageKind::Data => 1,
            MessageKind::Disconnect => 2,
            MessageKind::Ping => 3,
            MessageKind::Pong => 4,
            MessageKind::Internal => 5,
            MessageKind::Dummy => 6,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Connect),
            1 => Ok(MessageKind::Data),
            2 => Ok(MessageKind::Disconnect),
            3 => Ok(MessageKind::Ping),
            4 => Ok(MessageKind::Pong),
            5 => Ok(MessageKind::Internal),
            6 => Ok(MessageKind::Dummy),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Probe fields carried by Ping and Pong messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFields {
    /// Probe id, matched between a Ping and its Pong.
    pub id: u64,
    /// Responder's last measured outbound-stream latency, in milliseconds.
    pub outbound_leg_ms: Option<i64>,
    /// Responder's last measured return-stream latency, in milliseconds.
    pub return_leg_ms: Option<i64>,
    /// Identity of the node that originated the probe.
    pub origin: String,
}

/// A single message between two logical peers.
///
/// Immutable; exists only for the duration of a send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMessage {
    /// Message kind.
    pub kind: MessageKind,
    /// Identity of the sending node.
    pub source: String,
    /// Identity of the receiving node.
    pub destination: String,
    /// Logical port distinguishing connections between the same pair.
    pub port: i32,
    /// Application payload (empty for control messages).
    pub payload: Vec<u8>,
    /// Probe fields, present on Ping and Pong only.
    pub ping: Option<PingFields>,
}

impl VirtualMessage {
    /// Announce a new logical connection.
    pub fn connect(source: &str, destination: &str, port: i32) -> Self {
        Self::control(MessageKind::Connect, source, destination, port)
    }

    /// Carry application payload on an established connection.
    pub fn data(source: &str, destination: &str, port: i32, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Data,
            source: source.to_string(),
            destination: destination.to_string(),
            port,
            payload,
            ping: None,
        }
    }

    /// Tear down a logical connection.
    pub fn disconnect(source: &str, destination: &str, port: i32) -> Self {
        Self::control(MessageKind::Disconnect, source, destination, port)
    }

    /// Probe a peer for liveness and RTT.
    pub fn ping(source: &str, destination: &str, port: i32, probe_id: u64) -> Self {
        Self {
            ping: Some(PingFields {
                id: probe_id,
                outbound_leg_ms: None,
                return_leg_ms: None,
                origin: source.to_string(),
            }),
            ..Self::control(MessageKind::Ping, source, destination, port)
        }
    }

    /// Answer a probe, echoing its id and attaching local leg timings.
    pub fn pong(source: &str, destination: &str, port: i32, fields: PingFields) -> Self {
        Self {
            ping: Some(fields),
            ..Self::control(MessageKind::Pong, source, destination, port)
        }
    }

    /// Warm-up filler for a freshly opened stream.
    pub fn dummy(source: &str) -> Self {
        Self::control(MessageKind::Dummy, source, "", 0)
    }

    fn control(kind: MessageKind, source: &str, destination: &str, port: i32) -> Self {
        Self {
            kind,
            source: source.to_string(),
            destination: destination.to_string(),
            port,
            payload: Vec::new(),
            ping: None,
        }
    }

    /// Probe id, if this is a Ping or Pong.
    pub fn probe_id(&self) -> Option<u64> {
        self.ping.as_ref().map(|p| p.id)
    }
}

impl fmt::Display for VirtualMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Data => write!(
                f,
                "data({} -> {}:{}, {} bytes)",
                self.source,
                self.destination,
                self.port,
                self.payload.len()
            ),
            MessageKind::Ping | MessageKind::Pong => write!(
                f,
                "{}({} -> {}:{}, probe={})",
                self.kind.name(),
                self.source,
                self.destination,
                self.port,
                self.probe_id().unwrap_or(0)
            ),
            _ => write!(
                f,
                "{}({} -> {}:{})",
                self.kind.name(),
                self.source,
                self.destination,
                self.port
            ),
        }
    }
}
