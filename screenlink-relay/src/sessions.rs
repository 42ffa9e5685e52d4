//! Session index: which peers are registered under each join code.
//!
//! A session exists exactly as long as it has at least one member.

use std::collections::{HashMap, HashSet};

/// Mapping from `sessionId` to the set of member `peerId`s.
///
/// Not synchronized on its own; [`crate::state::RelayState`] guards it
/// together with the peer registry.
#[derive(Debug, Default)]
pub struct SessionIndex {
    sessions: HashMap<String, HashSet<String>>,
}

impl SessionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer_id` to `session_id`, creating the session if absent.
    pub fn join(&mut self, session_id: &str, peer_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(peer_id.to_string());
    }

    /// Removes `peer_id` from `session_id`, dropping the session once empty.
    pub fn leave(&mut self, session_id: &str, peer_id: &str) {
        if let Some(members) = self.sessions.get_mut(session_id) {
            members.remove(peer_id);
            if members.is_empty() {
                self.sessions.remove(session_id);
            }
        }
    }

    /// Current members of `session_id`; empty if the session does not exist.
    #[must_use]
    pub fn members(&self, session_id: &str) -> HashSet<String> {
        self.sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Returns `true` if the session currently has members.
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterates over `(sessionId, members)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.sessions.iter()
    }
}
