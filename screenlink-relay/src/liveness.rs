//! Heartbeat and stale-entry sweeps.
//!
//! Two independent periodic tasks keep the registry honest:
//!
//! - the heartbeat sweep closes every connection that did not answer the
//!   previous probe, then clears the flag and probes the rest with a
//!   WebSocket Ping;
//! - the stale sweep evicts registry entries whose connection has not
//!   answered a probe for longer than the configured age, even if the
//!   transport still looks alive.
//!
//! The sweep passes are plain functions over [`RelayState`] so they can be
//! driven directly in tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connection::SendError;
use crate::state::RelayState;

/// What one heartbeat pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections probed with a Ping.
    pub probed: usize,
    /// Connections closed for missing the previous probe.
    pub closed: usize,
}

/// Runs one heartbeat pass over every open connection.
pub fn heartbeat_sweep(state: &RelayState) -> SweepReport {
    let mut report = SweepReport::default();
    for conn in state.connections() {
        if !conn.take_alive() {
            let evicted = state.evict(conn.id());
            tracing::info!(
                conn_id = %conn.id(),
                peer_id = evicted.as_ref().map_or("-", |e| e.peer_id.as_str()),
                "closing unresponsive connection"
            );
            report.closed += 1;
            continue;
        }
        match conn.try_send(Message::Ping(Bytes::new())) {
            Ok(()) => report.probed += 1,
            // A full queue still counts as an outstanding probe; the next
            // pass closes the connection if nothing comes back.
            Err(SendError::Full) => {
                tracing::debug!(conn_id = %conn.id(), "outbound queue full, probe skipped");
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "probe failed");
            }
        }
    }
    if report.closed > 0 {
        tracing::debug!(probed = report.probed, closed = report.closed, "heartbeat sweep");
    }
    report
}

/// Evicts registry entries not seen for longer than `max_age`, returning
/// the evicted peer ids.
pub fn stale_sweep(state: &RelayState, now: Instant, max_age: Duration) -> Vec<String> {
    state
        .evict_stale(now, max_age)
        .into_iter()
        .map(|entry| {
            tracing::info!(
                peer_id = %entry.peer_id,
                session_id = %entry.session_id,
                registered_for_secs = now.saturating_duration_since(entry.registered_at).as_secs(),
                "evicting stale peer"
            );
            entry.peer_id
        })
        .collect()
}

/// Spawns the heartbeat task, running a pass every `interval`.
///
/// The first pass runs one full interval after spawning.
pub fn spawn_heartbeat(state: Arc<RelayState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            heartbeat_sweep(&state);
        }
    })
}

/// Spawns the stale-entry task, running a pass every `interval` with the
/// given age threshold.
pub fn spawn_reaper(
    state: Arc<RelayState>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let evicted = stale_sweep(&state, Instant::now(), max_age);
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "stale sweep evicted peers");
            }
        }
    })
}
