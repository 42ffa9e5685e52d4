//! WebSocket transport and HTTP surface.
//!
//! Each upgraded socket gets one reader loop, which dispatches frames into
//! the router in arrival order, and one writer task, which drains the
//! connection's bounded outbound queue. When the reader stops (client close,
//! transport error, or a forced close from a sweep) the connection is
//! detached from the registry before anything else happens.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::connection::ConnectionHandle;
use crate::liveness;
use crate::router;
use crate::state::{RelayState, RelayStats};

/// How long the writer gets to flush a Close frame after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Attach a [`ConnectionHandle`] to the relay state.
/// 2. Read frames until the client leaves or the relay closes the handle.
/// 3. Detach from the registry and session index.
/// 4. Give the writer a moment to flush the Close frame, then stop it.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(state.limits().outbound_queue_size);
    let conn = Arc::new(ConnectionHandle::new(tx));
    let conn_id = conn.id();
    state.attach(Arc::clone(&conn));
    tracing::info!(conn_id = %conn_id, "connection opened");

    // Writer: drains the outbound queue onto the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader: one frame at a time, dispatched synchronously.
    let reader_state = Arc::clone(&state);
    let reader_conn = Arc::clone(&conn);
    let mut read_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = reader_conn.closed() => {
                    tracing::debug!(conn_id = %conn_id, "connection closed by relay");
                    break;
                }
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        router::handle_text(&reader_state, &reader_conn, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        router::handle_binary(&reader_conn, data.len());
                    }
                    Some(Ok(Message::Pong(_))) => reader_conn.mark_alive(),
                    Some(Ok(Message::Ping(_))) => {
                        // axum answers pings itself.
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket read failed");
                        break;
                    }
                },
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {}
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    match state.detach(conn_id) {
        Some(entry) => tracing::info!(
            peer_id = %entry.peer_id,
            session_id = %entry.session_id,
            conn_id = %conn_id,
            "peer disconnected and unregistered"
        ),
        None => tracing::info!(conn_id = %conn_id, "connection closed"),
    }

    conn.close();
    if !write_task.is_finished() {
        let _ = tokio::time::timeout(CLOSE_GRACE, &mut write_task).await;
        write_task.abort();
    }
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    let max_message_size = state.limits().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    timestamp: String,
    server: &'static str,
    version: &'static str,
    port: Option<u16>,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        server: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        port: state.port(),
        uptime_secs: state.uptime().as_secs(),
    })
}

/// Liveness probe: answers as long as the process serves HTTP.
async fn test_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Server is running!",
        "port": state.port(),
    }))
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    #[serde(flatten)]
    stats: RelayStats,
    uptime_secs: u64,
}

async fn status_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(Status {
        stats: state.stats(),
        uptime_secs: state.uptime().as_secs(),
    })
}

/// Builds the axum router: `/ws`, `/health`, `/test`, `/status`.
pub fn app(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health_handler))
        .route("/test", axum::routing::get(test_handler))
        .route("/status", axum::routing::get(status_handler))
        .with_state(state)
}

/// Starts the relay server on the given address with default limits and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_limits`] to create a state with limits from the
/// resolved [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops it when `shutdown` resolves.
///
/// The heartbeat and stale-entry sweeps run for as long as the server does.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    state.set_port(bound_addr.port());

    let limits = state.limits().clone();
    let router = app(Arc::clone(&state));

    let handle = tokio::spawn(async move {
        let heartbeat = liveness::spawn_heartbeat(Arc::clone(&state), limits.heartbeat_interval);
        let reaper = liveness::spawn_reaper(
            Arc::clone(&state),
            limits.reap_interval,
            limits.stale_after,
        );

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }

        heartbeat.abort();
        reaper.abort();
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}
