//! Property-based tests for registry / session-index consistency.
//!
//! Uses proptest to verify:
//! 1. Registering distinct peers into one session makes `list-peers` return
//!    exactly those peers with their roles.
//! 2. Under any interleaving of register / detach / evict across a handful
//!    of connections, the session index and the peer registry never
//!    disagree, no peer sits in two sessions, and no empty session lingers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use proptest::prelude::*;
use screenlink_proto::signal::{PeerSummary, Role};
use screenlink_relay::connection::ConnectionHandle;
use screenlink_relay::state::RelayState;
use tokio::sync::mpsc;

const CONNECTIONS: usize = 4;
const PEER_IDS: [&str; 3] = ["A1", "B1", "C1"];
const SESSION_IDS: [&str; 2] = ["ABC123", "XYZ789"];

#[derive(Debug, Clone)]
enum Op {
    Register {
        conn: usize,
        peer: usize,
        session: usize,
        role: Role,
    },
    Detach(usize),
    Evict(usize),
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Sharer), Just(Role::Viewer)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..CONNECTIONS, 0..PEER_IDS.len(), 0..SESSION_IDS.len(), arb_role())
            .prop_map(|(conn, peer, session, role)| Op::Register { conn, peer, session, role }),
        1 => (0..CONNECTIONS).prop_map(Op::Detach),
        1 => (0..CONNECTIONS).prop_map(Op::Evict),
    ]
}

fn attach_all(state: &RelayState) -> Vec<(Arc<ConnectionHandle>, mpsc::Receiver<Message>)> {
    (0..CONNECTIONS)
        .map(|_| {
            let (tx, rx) = mpsc::channel(64);
            let handle = Arc::new(ConnectionHandle::new(tx));
            state.attach(Arc::clone(&handle));
            (handle, rx)
        })
        .collect()
}

fn check_invariants(state: &RelayState) -> Result<(), TestCaseError> {
    let snap = state.snapshot();
    let mut seen = HashSet::new();
    for (session_id, members) in &snap.sessions {
        prop_assert!(!members.is_empty(), "empty session {session_id} lingers");
        for peer_id in members {
            prop_assert!(seen.insert(peer_id.clone()), "{peer_id} is in two sessions");
            let entry = snap.peers.get(peer_id);
            prop_assert!(entry.is_some(), "{peer_id} listed but not registered");
            prop_assert_eq!(&entry.unwrap().0, session_id);
        }
    }
    for (peer_id, (session_id, _)) in &snap.peers {
        prop_assert!(
            snap.sessions.get(session_id).is_some_and(|m| m.contains(peer_id)),
            "{peer_id} registered but missing from {session_id}"
        );
    }
    Ok(())
}

proptest! {
    /// Distinct peers registered into one session are exactly what
    /// `list-peers` reports.
    #[test]
    fn list_peers_matches_registrations(
        peers in prop::collection::btree_map("[A-Z0-9]{1,8}", arb_role(), 1..12)
    ) {
        let state = RelayState::new();
        let mut receivers = Vec::new();
        for (peer_id, role) in &peers {
            let (tx, rx) = mpsc::channel(4);
            let handle = Arc::new(ConnectionHandle::new(tx));
            state.attach(Arc::clone(&handle));
            state.register_peer(handle.id(), peer_id, "ABC123", *role).unwrap();
            receivers.push(rx);
        }

        let listed: BTreeMap<String, bool> = state
            .peer_list("ABC123")
            .into_iter()
            .map(|PeerSummary { id, is_sharer }| (id, is_sharer))
            .collect();
        let expected: BTreeMap<String, bool> = peers
            .iter()
            .map(|(id, role)| (id.clone(), role.is_sharer()))
            .collect();
        prop_assert_eq!(listed, expected);
    }

    /// Registry and session index stay in lockstep under any op sequence.
    #[test]
    fn registry_and_sessions_never_diverge(ops in prop::collection::vec(arb_op(), 1..40)) {
        let state = RelayState::new();
        let conns = attach_all(&state);

        for op in ops {
            match op {
                Op::Register { conn, peer, session, role } => {
                    // Fails harmlessly on a connection that is already gone.
                    let _ = state.register_peer(
                        conns[conn].0.id(),
                        PEER_IDS[peer],
                        SESSION_IDS[session],
                        role,
                    );
                }
                Op::Detach(conn) => {
                    state.detach(conns[conn].0.id());
                }
                Op::Evict(conn) => {
                    state.evict(conns[conn].0.id());
                }
            }
            check_invariants(&state)?;
        }

        // Once every connection is gone, nothing is left behind.
        for (handle, _) in &conns {
            state.detach(handle.id());
        }
        let stats = state.stats();
        prop_assert_eq!((stats.peers, stats.sessions, stats.connections), (0, 0, 0));
    }
}
