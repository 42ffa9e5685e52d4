//! Message router: parses inbound envelopes and dispatches them by kind.
//!
//! The relay keeps no per-message protocol state. `register` and
//! `list-peers` are answered locally; `offer`, `answer` and `ice-candidate`
//! are forwarded to the target's connection with the sender's registered
//! `peerId` stamped into `from` and the payload left untouched.

use std::sync::Arc;

use axum::extract::ws::Message;
use screenlink_proto::codec;
use screenlink_proto::signal::{ClientMessage, Payload, Role, ServerMessage};

use crate::connection::{ConnectionHandle, SendError};
use crate::state::RelayState;

/// Longest accepted `peerId` or `sessionId`.
pub const MAX_ID_LEN: usize = 128;

/// Reply text for anything that is not a well-formed client envelope.
pub const INVALID_FORMAT: &str = "invalid message format";

/// Reply text when an `offer`/`answer` target is not reachable.
pub const TARGET_NOT_FOUND: &str = "target peer not found";

/// Reply text when the target's outbound queue is full.
pub const TARGET_BUSY: &str = "target peer unavailable";

/// Reply text when an unregistered connection tries to signal.
pub const NOT_REGISTERED: &str = "register before signaling";

/// A handshake payload on its way to a target.
#[derive(Debug)]
enum Forward {
    Offer(Payload),
    Answer(Payload),
    IceCandidate(Payload),
}

impl Forward {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
        }
    }

    /// Candidates for a vanished target are dropped without telling the
    /// sender.
    const fn reports_failure(&self) -> bool {
        !matches!(self, Self::IceCandidate(_))
    }

    fn into_message(self, from: String) -> ServerMessage {
        match self {
            Self::Offer(offer) => ServerMessage::Offer { from, offer },
            Self::Answer(answer) => ServerMessage::Answer { from, answer },
            Self::IceCandidate(candidate) => ServerMessage::IceCandidate { from, candidate },
        }
    }
}

/// Handles one text frame from `conn`, replying on `conn` if needed.
pub fn handle_text(state: &RelayState, conn: &Arc<ConnectionHandle>, text: &str) {
    let reply = match codec::decode_client(text) {
        Ok(msg) => dispatch(state, conn, msg),
        Err(e) => {
            tracing::warn!(conn_id = %conn.id(), error = %e, "rejecting malformed envelope");
            Some(ServerMessage::error(INVALID_FORMAT))
        }
    };
    if let Some(reply) = reply {
        reply_to(conn, &reply);
    }
}

/// Handles a binary frame. The protocol is text-only.
pub fn handle_binary(conn: &Arc<ConnectionHandle>, len: usize) {
    tracing::warn!(conn_id = %conn.id(), len, "rejecting binary frame");
    reply_to(conn, &ServerMessage::error(INVALID_FORMAT));
}

/// Dispatches a decoded envelope, returning the reply for the sender.
pub fn dispatch(
    state: &RelayState,
    conn: &Arc<ConnectionHandle>,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Register {
            peer_id,
            session_id,
            role,
        } => Some(register(state, conn, peer_id, session_id, role)),
        ClientMessage::Offer { target, offer } => {
            forward(state, conn, &target, Forward::Offer(offer))
        }
        ClientMessage::Answer { target, answer } => {
            forward(state, conn, &target, Forward::Answer(answer))
        }
        ClientMessage::IceCandidate { target, candidate } => {
            forward(state, conn, &target, Forward::IceCandidate(candidate))
        }
        ClientMessage::ListPeers { session_id } => {
            let peers = state.peer_list(&session_id);
            tracing::debug!(
                conn_id = %conn.id(),
                session_id = %session_id,
                count = peers.len(),
                "listing peers"
            );
            Some(ServerMessage::PeerList { session_id, peers })
        }
        ClientMessage::Ping => {
            conn.mark_alive();
            Some(ServerMessage::Pong)
        }
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().count() <= MAX_ID_LEN
}

fn register(
    state: &RelayState,
    conn: &Arc<ConnectionHandle>,
    peer_id: String,
    session_id: String,
    role: Role,
) -> ServerMessage {
    if !valid_id(&peer_id) || !valid_id(&session_id) {
        tracing::warn!(conn_id = %conn.id(), "register with empty or oversized id");
        return ServerMessage::error(format!(
            "peerId and sessionId must be 1 to {MAX_ID_LEN} characters"
        ));
    }

    match state.register_peer(conn.id(), &peer_id, &session_id, role) {
        Ok(registration) => {
            if let Some(released) = &registration.released {
                tracing::info!(
                    conn_id = %conn.id(),
                    old_peer_id = %released,
                    peer_id = %peer_id,
                    "connection re-registered under a new peer id"
                );
            }
            if let Some(superseded) = registration.superseded {
                // Last writer wins; the old socket stays open until it
                // disconnects or the sweeps collect it.
                tracing::warn!(
                    peer_id = %peer_id,
                    conn_id = %conn.id(),
                    superseded = %superseded,
                    "peer id taken over by a new connection"
                );
            }
            conn.mark_alive();
            tracing::info!(
                peer_id = %peer_id,
                session_id = %session_id,
                role = %role,
                conn_id = %conn.id(),
                "peer registered"
            );
            ServerMessage::Registered {
                peer_id,
                session_id,
            }
        }
        Err(e) => {
            tracing::warn!(peer_id = %peer_id, error = %e, "registration failed");
            ServerMessage::error(e.to_string())
        }
    }
}

fn forward(
    state: &RelayState,
    conn: &Arc<ConnectionHandle>,
    target: &str,
    payload: Forward,
) -> Option<ServerMessage> {
    let kind = payload.kind();
    let Some(from) = state.peer_of(conn.id()) else {
        tracing::warn!(conn_id = %conn.id(), kind, "signaling before register");
        return Some(ServerMessage::error(NOT_REGISTERED));
    };
    let reports_failure = payload.reports_failure();

    let frame = match codec::encode_server(&payload.into_message(from.clone())) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => {
            tracing::error!(from = %from, kind, error = %e, "failed to encode forward");
            return reports_failure.then(|| ServerMessage::error(INVALID_FORMAT));
        }
    };

    let failure = match state.send_to_peer(target, frame) {
        Some(Ok(())) => {
            tracing::debug!(from = %from, to = %target, kind, "forwarded");
            return None;
        }
        None | Some(Err(SendError::Closed)) => TARGET_NOT_FOUND,
        Some(Err(SendError::Full)) => TARGET_BUSY,
        Some(Err(SendError::Encoding(_))) => INVALID_FORMAT,
    };

    if reports_failure {
        tracing::info!(from = %from, to = %target, kind, reason = failure, "forward failed");
        Some(ServerMessage::error(failure))
    } else {
        tracing::debug!(from = %from, to = %target, kind, "dropping candidate for unreachable peer");
        None
    }
}

/// Queues `msg` on the sender's own connection.
fn reply_to(conn: &Arc<ConnectionHandle>, msg: &ServerMessage) {
    if let Err(e) = conn.send_json(msg) {
        tracing::warn!(conn_id = %conn.id(), error = %e, "dropping reply");
    }
}
