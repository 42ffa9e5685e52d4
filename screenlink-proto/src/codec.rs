//! JSON text codec for signaling envelopes.
//!
//! One envelope per WebSocket text frame. The relay side decodes
//! [`ClientMessage`] and encodes [`ServerMessage`]; the mirror pair is used by
//! clients and tests.

use crate::signal::{ClientMessage, ServerMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON, has an unknown `type`, or is missing a
    /// required field.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Decodes a client envelope from a text frame.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a well-formed client
/// envelope.
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Encodes a relay envelope into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a client envelope into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a relay envelope from a text frame.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a well-formed relay
/// envelope.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}
