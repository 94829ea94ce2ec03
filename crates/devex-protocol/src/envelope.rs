//! The `{event, data}` envelope, the unit of wire transmission.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload could not be serialized. This is a programmer error (the
    /// payload contains a non-JSON-representable value) and is surfaced
    /// immediately rather than swallowed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame was not a valid envelope. Callers are expected to log
    /// and drop the frame; a malformed frame must never tear down the
    /// transport.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A single wire message: a logical event name plus its payload.
///
/// Every frame sent or received is exactly one envelope, serialized as one
/// complete text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical message name, e.g. `fetchDir` or `terminalResponse`.
    pub event: String,

    /// Payload; shape depends on `event`. Absent on the wire when null.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from an event name and payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize to a single text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse an inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// The correlation id embedded in the payload, if the peer echoed one.
    pub fn request_id(&self) -> Option<u64> {
        self.data.get("id").and_then(Value::as_u64)
    }
}
