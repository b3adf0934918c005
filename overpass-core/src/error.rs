//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload was not valid base64.
    #[error("invalid payload encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The wire envelope was not valid JSON for the expected schema.
    #[error("malformed wire message: {0}")]
    Json(#[from] serde_json::Error),

    /// The `t` property carried a value outside the known kinds.
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    /// The `z` property disagrees with the decoded payload length.
    #[error("payload length mismatch: header says {header}, payload is {actual}")]
    LengthMismatch {
        /// Length claimed by the `z` property.
        header: usize,
        /// Length of the decoded payload.
        actual: usize,
    },

    /// A Ping or Pong arrived without its probe fields.
    #[error("{kind} message missing probe id")]
    MissingProbeId {
        /// The offending message kind.
        kind: &'static str,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
