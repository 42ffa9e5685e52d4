//! Per-client connection handle.
//!
//! A [`ConnectionHandle`] is the relay's grip on one WebSocket: the bounded
//! outbound queue drained by the connection's writer task, the liveness flag
//! flipped by the heartbeat sweep, the last-seen timestamp read by the stale
//! sweep, and a close signal the reader loop waits on.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use screenlink_proto::codec;
use screenlink_proto::signal::ServerMessage;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

/// Why a non-blocking send to a connection did not go through.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    /// The outbound queue is at capacity; the message was dropped.
    #[error("outbound queue full")]
    Full,
    /// The connection has been closed or its writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The envelope could not be serialized.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// Shared handle to one client's duplex channel.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::Sender<Message>,
    alive: AtomicBool,
    closed: AtomicBool,
    last_seen: Mutex<Instant>,
    close_signal: Notify,
}

impl ConnectionHandle {
    /// Creates a handle around the sender half of a connection's outbound
    /// queue. The connection starts open and alive.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::now_v7(),
            outbound,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
            close_signal: Notify::new(),
        }
    }

    /// Unique id of this connection.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Full`] if the queue is at capacity and
    /// [`SendError::Closed`] if the connection is closed.
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Encodes `msg` as a JSON text frame and queues it without waiting.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandle::try_send`]; also [`SendError::Encoding`].
    pub fn send_json(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let text = codec::encode_server(msg).map_err(|e| SendError::Encoding(e.to_string()))?;
        self.try_send(Message::Text(text.into()))
    }

    /// Records a probe response: sets the liveness flag and refreshes
    /// last-seen.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
        *self.last_seen.lock() = Instant::now();
    }

    /// Clears the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Last time this connection answered a probe (or was opened).
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Returns `false` once [`ConnectionHandle::close`] has been called or the
    /// writer task has dropped its receiver.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Forcibly closes the connection. Idempotent.
    ///
    /// A best-effort Close frame is queued, then the reader loop is woken so
    /// the socket task tears down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.try_send(Message::Close(None));
        self.close_signal.notify_one();
    }

    /// Resolves once [`ConnectionHandle::close`] has been called.
    pub async fn closed(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.close_signal.notified().await;
    }
}
