//! `ScreenLink` signaling relay library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, registers peers into sessions
//! by join code, and forwards handshake envelopes (offers, answers and
//! connectivity candidates) between them without looking inside.

pub mod config;
pub mod connection;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;
pub mod sessions;
pub mod state;
