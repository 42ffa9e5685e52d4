//! Shared relay state.
//!
//! [`RelayState`] owns the peer registry, the session index, and the table
//! of open connections behind a single mutex, so a peer's registry entry and
//! its session membership always change together. It is built once per
//! process and handed to every connection task and sweep as an
//! `Arc<RelayState>`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use screenlink_proto::signal::{PeerSummary, Role};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::connection::{ConnectionHandle, SendError};
use crate::registry::{PeerEntry, PeerRegistry};
use crate::sessions::SessionIndex;

/// Tunables the relay reads at runtime.
#[derive(Debug, Clone)]
pub struct RelayLimits {
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Period of the heartbeat sweep.
    pub heartbeat_interval: Duration,
    /// Period of the stale-entry sweep.
    pub reap_interval: Duration,
    /// Age past which a registry entry is evicted regardless of liveness.
    pub stale_after: Duration,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            outbound_queue_size: 256,
            max_message_size: 64 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            reap_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl From<&RelayConfig> for RelayLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            outbound_queue_size: config.outbound_queue_size,
            max_message_size: config.max_message_size,
            heartbeat_interval: config.heartbeat_interval,
            reap_interval: config.reap_interval,
            stale_after: config.stale_after,
        }
    }
}

/// Errors from compound registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// The connection was never attached or has already been released.
    #[error("connection {0} is not attached")]
    UnknownConnection(Uuid),
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Peer id this connection held before, if it re-registered under a new
    /// id.
    pub released: Option<String>,
    /// Connection that previously owned the peer id, if another connection
    /// did. It is left open.
    pub superseded: Option<Uuid>,
}

/// Counts reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RelayStats {
    /// Registered peers.
    pub peers: usize,
    /// Non-empty sessions.
    pub sessions: usize,
    /// Open connections, registered or not.
    pub connections: usize,
}

/// Point-in-time copy of the registry and session index.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    /// `peerId` to `(sessionId, role)`.
    pub peers: HashMap<String, (String, Role)>,
    /// `sessionId` to members.
    pub sessions: HashMap<String, HashSet<String>>,
}

#[derive(Debug)]
struct ConnectionSlot {
    handle: Arc<ConnectionHandle>,
    peer_id: Option<String>,
}

#[derive(Debug, Default)]
struct Directory {
    peers: PeerRegistry,
    sessions: SessionIndex,
    connections: HashMap<Uuid, ConnectionSlot>,
}

impl Directory {
    /// Drops the connection slot and, if the connection still owns its peer
    /// id, the registry entry and session membership.
    fn detach(&mut self, conn_id: Uuid) -> Option<(Arc<ConnectionHandle>, Option<PeerEntry>)> {
        let slot = self.connections.remove(&conn_id)?;
        let entry = slot
            .peer_id
            .as_deref()
            .and_then(|peer_id| self.peers.remove_if_owned(peer_id, conn_id));
        if let Some(entry) = &entry {
            self.sessions.leave(&entry.session_id, &entry.peer_id);
        }
        Some((slot.handle, entry))
    }
}

/// Shared relay state.
pub struct RelayState {
    directory: Mutex<Directory>,
    limits: RelayLimits,
    started_at: Instant,
    /// Port the listener bound to; 0 until the server starts.
    port: AtomicU16,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates an empty relay state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(RelayLimits::default())
    }

    /// Creates an empty relay state with custom limits.
    #[must_use]
    pub fn with_limits(limits: RelayLimits) -> Self {
        Self {
            directory: Mutex::new(Directory::default()),
            limits,
            started_at: Instant::now(),
            port: AtomicU16::new(0),
        }
    }

    /// The limits this state was built with.
    #[must_use]
    pub const fn limits(&self) -> &RelayLimits {
        &self.limits
    }

    /// Time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Records the port the listener is bound to.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// The bound port, once the server has started.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self.port.load(Ordering::Relaxed) {
            0 => None,
            port => Some(port),
        }
    }

    /// Tracks a newly opened connection.
    pub fn attach(&self, handle: Arc<ConnectionHandle>) {
        let conn_id = handle.id();
        self.directory.lock().connections.insert(
            conn_id,
            ConnectionSlot {
                handle,
                peer_id: None,
            },
        );
    }

    /// Registers `peer_id` in `session_id` on connection `conn_id`.
    ///
    /// Last writer wins: if another connection held `peer_id`, its entry is
    /// replaced (and its old session membership dropped) and that connection
    /// goes back to unregistered, though it stays open. If this connection was registered under a
    /// different id, that registration is released first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownConnection`] if `conn_id` is not attached.
    pub fn register_peer(
        &self,
        conn_id: Uuid,
        peer_id: &str,
        session_id: &str,
        role: Role,
    ) -> Result<Registration, StateError> {
        let mut guard = self.directory.lock();
        let dir = &mut *guard;
        let slot = dir
            .connections
            .get_mut(&conn_id)
            .ok_or(StateError::UnknownConnection(conn_id))?;

        let mut released = None;
        if let Some(previous) = slot.peer_id.take()
            && previous != peer_id
        {
            if let Some(entry) = dir.peers.remove_if_owned(&previous, conn_id) {
                dir.sessions.leave(&entry.session_id, &entry.peer_id);
            }
            released = Some(previous);
        }
        slot.peer_id = Some(peer_id.to_string());
        let handle = Arc::clone(&slot.handle);

        let mut superseded = None;
        if let Some(old) = dir.peers.register(peer_id, session_id, role, handle) {
            dir.sessions.leave(&old.session_id, peer_id);
            if old.conn_id() != conn_id {
                // The old socket no longer speaks as `peer_id`.
                if let Some(old_slot) = dir.connections.get_mut(&old.conn_id()) {
                    old_slot.peer_id = None;
                }
                superseded = Some(old.conn_id());
            }
        }
        dir.sessions.join(session_id, peer_id);
        drop(guard);

        Ok(Registration {
            released,
            superseded,
        })
    }

    /// Peer id registered on connection `conn_id`, if any.
    #[must_use]
    pub fn peer_of(&self, conn_id: Uuid) -> Option<String> {
        self.directory
            .lock()
            .connections
            .get(&conn_id)
            .and_then(|slot| slot.peer_id.clone())
    }

    /// Connection currently representing `peer_id`.
    #[must_use]
    pub fn lookup(&self, peer_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.directory
            .lock()
            .peers
            .lookup(peer_id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Queues `frame` on the connection currently registered as `peer_id`.
    ///
    /// The lookup and the non-blocking send happen under the registry lock,
    /// so a concurrent disconnect cannot interleave between them. Returns
    /// `None` if no such peer is registered.
    pub fn send_to_peer(&self, peer_id: &str, frame: Message) -> Option<Result<(), SendError>> {
        let dir = self.directory.lock();
        let entry = dir.peers.lookup(peer_id)?;
        Some(entry.connection.try_send(frame))
    }

    /// Members of `session_id` tagged with their roles, sorted by id.
    /// Empty when the session does not exist.
    #[must_use]
    pub fn peer_list(&self, session_id: &str) -> Vec<PeerSummary> {
        let dir = self.directory.lock();
        let mut peers: Vec<PeerSummary> = dir
            .sessions
            .members(session_id)
            .into_iter()
            .filter_map(|peer_id| {
                dir.peers.lookup(&peer_id).map(|entry| PeerSummary {
                    id: peer_id,
                    is_sharer: entry.role.is_sharer(),
                })
            })
            .collect();
        drop(dir);
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Releases connection `conn_id` after its socket closed.
    ///
    /// Removes the registry entry and session membership only if this
    /// connection still owns its peer id. Idempotent; returns the removed
    /// entry.
    pub fn detach(&self, conn_id: Uuid) -> Option<PeerEntry> {
        self.directory
            .lock()
            .detach(conn_id)
            .and_then(|(_, entry)| entry)
    }

    /// Detaches connection `conn_id` and forcibly closes it.
    pub fn evict(&self, conn_id: Uuid) -> Option<PeerEntry> {
        let detached = self.directory.lock().detach(conn_id);
        let (handle, entry) = detached?;
        handle.close();
        entry
    }

    /// Evicts every registered peer whose connection has not been seen for
    /// longer than `max_age` as of `now`, closing those connections.
    pub fn evict_stale(&self, now: Instant, max_age: Duration) -> Vec<PeerEntry> {
        let mut dir = self.directory.lock();
        let stale: Vec<Uuid> = dir
            .peers
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen()) > max_age)
            .map(PeerEntry::conn_id)
            .collect();
        let detached: Vec<_> = stale
            .into_iter()
            .filter_map(|conn_id| dir.detach(conn_id))
            .collect();
        drop(dir);

        detached
            .into_iter()
            .filter_map(|(handle, entry)| {
                handle.close();
                entry
            })
            .collect()
    }

    /// Handles of all open connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.directory
            .lock()
            .connections
            .values()
            .map(|slot| Arc::clone(&slot.handle))
            .collect()
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let dir = self.directory.lock();
        RelayStats {
            peers: dir.peers.len(),
            sessions: dir.sessions.len(),
            connections: dir.connections.len(),
        }
    }

    /// Copies the registry and session index.
    #[must_use]
    pub fn snapshot(&self) -> DirectorySnapshot {
        let dir = self.directory.lock();
        DirectorySnapshot {
            peers: dir
                .peers
                .iter()
                .map(|e| (e.peer_id.clone(), (e.session_id.clone(), e.role)))
                .collect(),
            sessions: dir
                .sessions
                .iter()
                .map(|(id, members)| (id.clone(), members.clone()))
                .collect(),
        }
    }

    /// Closes every open connection. Used on shutdown.
    pub fn close_all_connections(&self) {
        for handle in self.connections() {
            tracing::info!(conn_id = %handle.id(), "closing connection");
            handle.close();
        }
    }
}
