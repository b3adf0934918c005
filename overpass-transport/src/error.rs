//! Transport error types.

use thiserror::Error;

use overpass_core::CodecError;

use crate::broker::BrokerError;
use crate::table::ConnectionId;

/// Transport-specific errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A broker call failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A wire message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The referenced logical connection does not exist.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The transport has not finished bootstrapping its broker resources.
    #[error("transport not ready")]
    NotReady,

    /// The command channel closed (the driver was dropped).
    #[error("command channel closed")]
    ChannelClosed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
