//! Peer registry: which connection currently represents each `peerId`.
//!
//! Registration is last-writer-wins. Replacing an entry hands the superseded
//! entry back to the caller but does not close its connection; the
//! superseded socket keeps running until it disconnects or is reaped.

use std::collections::HashMap;
use std::sync::Arc;

use screenlink_proto::signal::Role;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::ConnectionHandle;

/// A registered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Identifier chosen by the client.
    pub peer_id: String,
    /// Session the peer registered under. Fixed for the entry's lifetime.
    pub session_id: String,
    /// Sharer or viewer.
    pub role: Role,
    /// The connection envelopes for this peer are pushed to.
    pub connection: Arc<ConnectionHandle>,
    /// When the entry was created.
    pub registered_at: Instant,
}

impl PeerEntry {
    /// Last probe response seen on the peer's connection.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.connection.last_seen()
    }

    /// Id of the owning connection.
    #[must_use]
    pub fn conn_id(&self) -> Uuid {
        self.connection.id()
    }
}

/// Mapping from `peerId` to [`PeerEntry`].
///
/// Not synchronized on its own; [`crate::state::RelayState`] guards it
/// together with the session index.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerEntry>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `peer_id`, returning the replaced
    /// entry if there was one.
    pub fn register(
        &mut self,
        peer_id: &str,
        session_id: &str,
        role: Role,
        connection: Arc<ConnectionHandle>,
    ) -> Option<PeerEntry> {
        self.peers.insert(
            peer_id.to_string(),
            PeerEntry {
                peer_id: peer_id.to_string(),
                session_id: session_id.to_string(),
                role,
                connection,
                registered_at: Instant::now(),
            },
        )
    }

    /// Returns the current entry for `peer_id`.
    #[must_use]
    pub fn lookup(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    /// Removes the entry for `peer_id`. Idempotent.
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerEntry> {
        self.peers.remove(peer_id)
    }

    /// Removes the entry for `peer_id` only if it still belongs to
    /// connection `conn_id`.
    pub fn remove_if_owned(&mut self, peer_id: &str, conn_id: Uuid) -> Option<PeerEntry> {
        match self.peers.get(peer_id) {
            Some(entry) if entry.conn_id() == conn_id => self.peers.remove(peer_id),
            _ => None,
        }
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }
}
