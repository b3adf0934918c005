//! JSON wire schema spoken to the pub/sub broker.
//!
//! Every message crossing a physical stream is a [`WireMessage`]: a broker
//! delivery id, a base64 payload, and a flat property bag with single-letter
//! keys. The short keys are the interoperability contract with the backend
//! and with unchanged peers — they must not be renamed.
//!
//! The broker delivers at-least-once and requires an explicit
//! acknowledgement ([`Ack`]) for every delivery; unacknowledged messages are
//! redelivered. The receiver therefore acks every message it manages to
//! parse, whether or not it was addressed to it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::message::{MessageKind, PingFields, VirtualMessage};

/// Broker envelope for a single message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Delivery id assigned by the broker; empty on the producer side.
    #[serde(default)]
    pub message_id: String,
    /// Payload bytes, base64-encoded.
    pub payload: String,
    /// Routing and probe properties.
    pub properties: WireProperties,
}

/// The property bag of a [`WireMessage`].
///
/// Field names are the single-letter wire keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireProperties {
    /// Message kind.
    #[serde(rename = "t")]
    pub kind: MessageKind,
    /// Logical port.
    #[serde(rename = "p")]
    pub port: i32,
    /// Destination node identity.
    #[serde(rename = "d")]
    pub destination: String,
    /// Source node identity.
    #[serde(rename = "s")]
    pub source: String,
    /// Decoded payload length in bytes.
    #[serde(rename = "z")]
    pub payload_len: usize,
    /// Probe id (Ping/Pong only).
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub probe_id: Option<u64>,
    /// Responder's outbound-leg latency in milliseconds (Pong only).
    #[serde(rename = "o", default, skip_serializing_if = "Option::is_none")]
    pub outbound_leg_ms: Option<i64>,
    /// Responder's return-leg latency in milliseconds (Pong only).
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub return_leg_ms: Option<i64>,
    /// Identity of the probe's originating node (Ping/Pong only).
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Acknowledgement echoed to the broker for every parsed delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// The delivery id being acknowledged.
    pub message_id: String,
}

impl Ack {
    /// Build the acknowledgement for a received wire message.
    pub fn for_message(message: &WireMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
        }
    }
}

/// Encode a virtual message into its wire envelope.
///
/// The broker assigns the delivery id, so `message_id` is left empty.
pub fn encode(message: &VirtualMessage) -> WireMessage {
    let (probe_id, outbound_leg_ms, return_leg_ms, origin) = match &message.ping {
        Some(fields) => (
            Some(fields.id),
            fields.outbound_leg_ms,
            fields.return_leg_ms,
            Some(fields.origin.clone()),
        ),
        None => (None, None, None, None),
    };

    WireMessage {
        message_id: String::new(),
        payload: BASE64.encode(&message.payload),
        properties: WireProperties {
            kind: message.kind,
            port: message.port,
            destination: message.destination.clone(),
            source: message.source.clone(),
            payload_len: message.payload.len(),
            probe_id,
            outbound_leg_ms,
            return_leg_ms,
            origin,
        },
    }
}

/// Decode a wire envelope back into a virtual message.
pub fn decode(wire: &WireMessage) -> CodecResult<VirtualMessage> {
    let payload = BASE64.decode(&wire.payload)?;
    let props = &wire.properties;

    if payload.len() != props.payload_len {
        return Err(CodecError::LengthMismatch {
            header: props.payload_len,
            actual: payload.len(),
        });
    }

    let ping = match props.kind {
        MessageKind::Ping | MessageKind::Pong => {
            let id = props.probe_id.ok_or(CodecError::MissingProbeId {
                kind: props.kind.name(),
            })?;
            Some(PingFields {
                id,
                outbound_leg_ms: props.outbound_leg_ms,
                return_leg_ms: props.return_leg_ms,
                origin: props.origin.clone().unwrap_or_default(),
            })
        }
        _ => None,
    };

    Ok(VirtualMessage {
        kind: props.kind,
        source: props.source.clone(),
        destination: props.destination.clone(),
        port: props.port,
        payload,
        ping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_data() {
        let original = VirtualMessage::data("Client-1", "Server", 7777, vec![1, 2, 3, 4]);
        let wire = encode(&original);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_roundtrip_pong_fields() {
        let original = VirtualMessage::pong(
            "Server",
            "Client-1",
            7777,
            PingFields {
                id: 17,
                outbound_leg_ms: Some(4),
                return_leg_ms: Some(6),
                origin: "Client-1".to_string(),
            },
        );
        let wire = encode(&original);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wire_keys_are_short() {
        let wire = encode(&VirtualMessage::ping("a", "b", 5, 9));
        let json = serde_json::to_string(&wire).unwrap();

        assert!(json.contains("\"messageId\":\"\""));
        assert!(json.contains("\"t\":3"));
        assert!(json.contains("\"p\":5"));
        assert!(json.contains("\"d\":\"b\""));
        assert!(json.contains("\"s\":\"a\""));
        assert!(json.contains("\"z\":0"));
        assert!(json.contains("\"i\":9"));
        assert!(json.contains("\"n\":\"a\""));
        // Leg timings are absent until a responder fills them in.
        assert!(!json.contains("\"o\":"));
        assert!(!json.contains("\"r\":"));
    }

    #[test]
    fn test_control_messages_omit_probe_keys() {
        let wire = encode(&VirtualMessage::connect("a", "b", 1));
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("\"i\":"));
        assert!(!json.contains("\"n\":"));
    }

    #[test]
    fn test_payload_is_base64() {
        let wire = encode(&VirtualMessage::data("a", "b", 1, b"hello".to_vec()));
        assert_eq!(wire.payload, "aGVsbG8=");
        assert_eq!(wire.properties.payload_len, 5);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let mut wire = encode(&VirtualMessage::data("a", "b", 1, vec![1]));
        wire.payload = "not@base64!".to_string();
        assert!(matches!(decode(&wire), Err(CodecError::Base64(_))));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut wire = encode(&VirtualMessage::data("a", "b", 1, vec![1, 2, 3]));
        wire.properties.payload_len = 99;
        assert!(matches!(
            decode(&wire),
            Err(CodecError::LengthMismatch { header: 99, actual: 3 })
        ));
    }

    #[test]
    fn test_decode_rejects_ping_without_probe_id() {
        let mut wire = encode(&VirtualMessage::ping("a", "b", 1, 3));
        wire.properties.probe_id = None;
        assert!(matches!(
            decode(&wire),
            Err(CodecError::MissingProbeId { kind: "ping" })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let wire = encode(&VirtualMessage::connect("a", "b", 1));
        let mut json: serde_json::Value = serde_json::to_value(&wire).unwrap();
        json["properties"]["t"] = serde_json::json!(42);

        let result: Result<WireMessage, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_echoes_delivery_id() {
        let mut wire = encode(&VirtualMessage::connect("a", "b", 1));
        wire.message_id = "m-123".to_string();

        let ack = Ack::for_message(&wire);
        assert_eq!(ack.message_id, "m-123");

        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"messageId":"m-123"}"#);
    }

    #[test]
    fn test_tolerates_extra_broker_fields() {
        let json = r#"{
            "messageId": "m-1",
            "payload": "",
            "publishTime": "2024-01-01T00:00:00Z",
            "properties": {"t": 0, "p": 1, "d": "b", "s": "a", "z": 0}
        }"#;
        let wire: WireMessage = serde_json::from_str(json).unwrap();
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.kind, MessageKind::Connect);
    }
}
