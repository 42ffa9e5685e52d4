//! Shared protocol definitions for the `ScreenLink` signaling relay.
//!
//! Envelopes are UTF-8 JSON text frames of the shape
//! `{"type": <kind>, ...fields}`. Handshake payloads (offers, answers and
//! connectivity candidates) are carried as opaque JSON values.

pub mod codec;
pub mod signal;
