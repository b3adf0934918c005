//! # Overpass Core
//!
//! Wire message model and codec for the Overpass transport.
//!
//! This crate defines the shared vocabulary between both transport roles:
//! - Virtual message kinds and the [`VirtualMessage`] envelope
//! - The JSON wire schema spoken to the pub/sub broker ([`WireMessage`])
//! - Acknowledgement records for the broker's at-least-once contract
//!
//! It deliberately contains no I/O: encoding and decoding are pure
//! transformations so that both the transport crate and test harnesses can
//! use them without a broker in reach.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod wire;

// Re-export commonly used types at crate root
pub use error::{CodecError, CodecResult};
pub use message::{MessageKind, PingFields, VirtualMessage};
pub use wire::{decode, encode, Ack, WireMessage, WireProperties};
