// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! End-to-end signaling over real WebSocket connections.
//!
//! Each test starts an in-process relay on an OS-assigned port and drives it
//! with `tokio-tungstenite` clients speaking JSON text frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use screenlink_proto::codec;
use screenlink_proto::signal::{ClientMessage, Payload, PeerSummary, Role, ServerMessage};
use screenlink_relay::server;
use screenlink_relay::state::RelayState;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("relay should start");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    ws
}

async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

async fn send(ws: &mut Client, msg: &ClientMessage) {
    send_raw(ws, &codec::encode_client(msg).unwrap()).await;
}

async fn recv_text(ws: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        if let tungstenite::Message::Text(text) = frame {
            return text.as_str().to_string();
        }
    }
}

async fn recv(ws: &mut Client) -> ServerMessage {
    codec::decode_server(&recv_text(ws).await).unwrap()
}

fn payload(value: &Value) -> Payload {
    Payload::from_value(value).unwrap()
}

/// Asserts nothing arrives on `ws` for a short while.
async fn assert_quiet(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

async fn register(addr: std::net::SocketAddr, peer_id: &str, session_id: &str, role: Role) -> Client {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientMessage::Register {
            peer_id: peer_id.into(),
            session_id: session_id.into(),
            role,
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Registered {
            peer_id: peer_id.into(),
            session_id: session_id.into(),
        }
    );
    ws
}

async fn list(ws: &mut Client, session_id: &str) -> Vec<PeerSummary> {
    send(
        ws,
        &ClientMessage::ListPeers {
            session_id: session_id.into(),
        },
    )
    .await;
    match recv(ws).await {
        ServerMessage::PeerList { peers, .. } => {
            let mut peers = peers;
            peers.sort_by(|a, b| a.id.cmp(&b.id));
            peers
        }
        other => panic!("expected PeerList, got {other:?}"),
    }
}

/// Polls until `check` holds or five seconds pass.
async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn sharer_and_viewer_handshake() {
    let (addr, _state) = start().await;
    let mut a = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    assert_eq!(
        list(&mut b, "ABC123").await,
        vec![
            PeerSummary {
                id: "A1".into(),
                is_sharer: true
            },
            PeerSummary {
                id: "B1".into(),
                is_sharer: false
            },
        ]
    );

    // Raw text so the payload bytes are exactly what a browser would send.
    send_raw(
        &mut b,
        r#"{"type":"offer","target":"A1","offer":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}}"#,
    )
    .await;
    assert_eq!(
        recv_text(&mut a).await,
        r#"{"type":"offer","from":"B1","offer":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}}"#
    );

    send(
        &mut a,
        &ClientMessage::Answer {
            target: "B1".into(),
            answer: payload(&json!({"type": "answer", "sdp": "v=0"})),
        },
    )
    .await;
    assert_eq!(
        recv(&mut b).await,
        ServerMessage::Answer {
            from: "A1".into(),
            answer: payload(&json!({"type": "answer", "sdp": "v=0"})),
        }
    );

    let candidate = json!({
        "candidate": "candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx",
        "sdpMid": "0",
        "sdpMLineIndex": 0,
        "usernameFragment": null
    });
    send(
        &mut a,
        &ClientMessage::IceCandidate {
            target: "B1".into(),
            candidate: payload(&candidate),
        },
    )
    .await;
    assert_eq!(
        recv(&mut b).await,
        ServerMessage::IceCandidate {
            from: "A1".into(),
            candidate: payload(&candidate),
        }
    );
}

#[tokio::test]
async fn offer_to_unregistered_target_only_errors_sender() {
    let (addr, _state) = start().await;
    let mut a = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    send(
        &mut b,
        &ClientMessage::Offer {
            target: "NOBODY".into(),
            offer: payload(&json!({"sdp": "x"})),
        },
    )
    .await;
    assert_eq!(
        recv(&mut b).await,
        ServerMessage::error("target peer not found")
    );
    assert_quiet(&mut a).await;

    // B is still registered and usable.
    assert_eq!(list(&mut b, "ABC123").await.len(), 2);
}

#[tokio::test]
async fn candidate_after_target_left_is_silent() {
    let (addr, state) = start().await;
    let a = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    drop(a);
    eventually(|| state.lookup("A1").is_none()).await;

    send(
        &mut b,
        &ClientMessage::IceCandidate {
            target: "A1".into(),
            candidate: payload(&json!({"candidate": ""})),
        },
    )
    .await;
    assert_quiet(&mut b).await;

    // The relay is still serving B.
    send(&mut b, &ClientMessage::Ping).await;
    assert_eq!(recv(&mut b).await, ServerMessage::Pong);
}

#[tokio::test]
async fn graceful_close_removes_peer_and_session() {
    let (addr, state) = start().await;
    let mut a = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    a.close(None).await.unwrap();
    eventually(|| state.lookup("A1").is_none()).await;
    assert_eq!(
        list(&mut b, "ABC123").await,
        vec![PeerSummary {
            id: "B1".into(),
            is_sharer: false
        }]
    );

    b.close(None).await.unwrap();
    eventually(|| state.stats().sessions == 0).await;
    assert!(state.snapshot().sessions.is_empty());
}

#[tokio::test]
async fn abrupt_drop_removes_peer() {
    let (addr, state) = start().await;
    let a = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    drop(a);
    eventually(|| state.lookup("A1").is_none()).await;
    assert_eq!(list(&mut b, "ABC123").await.len(), 1);
}

#[tokio::test]
async fn malformed_frames_keep_connection_open() {
    let (addr, _state) = start().await;
    let mut ws = connect(addr).await;

    send_raw(&mut ws, "{not json").await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::error("invalid message format")
    );

    send_raw(&mut ws, r#"{"type":"register","peerId":"A1"}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::error("invalid message format")
    );

    send(&mut ws, &ClientMessage::Ping).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);
}

#[tokio::test]
async fn duplicate_peer_id_last_writer_wins() {
    let (addr, state) = start().await;
    let mut first = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut second = register(addr, "A1", "ABC123", Role::Sharer).await;
    let mut b = register(addr, "B1", "ABC123", Role::Viewer).await;

    send(
        &mut b,
        &ClientMessage::Offer {
            target: "A1".into(),
            offer: payload(&json!({"n": 2})),
        },
    )
    .await;
    assert!(matches!(recv(&mut second).await, ServerMessage::Offer { .. }));
    assert_quiet(&mut first).await;

    // The superseded socket no longer speaks as A1.
    send(
        &mut first,
        &ClientMessage::Answer {
            target: "B1".into(),
            answer: payload(&json!({"sdp": "stale"})),
        },
    )
    .await;
    assert_eq!(
        recv(&mut first).await,
        ServerMessage::error("register before signaling")
    );
    assert_quiet(&mut b).await;

    // The superseded socket leaving does not unregister the new owner.
    first.close(None).await.unwrap();
    eventually(|| state.stats().connections == 2).await;
    assert!(state.lookup("A1").is_some());
    assert_eq!(list(&mut b, "ABC123").await.len(), 2);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let (addr, _state) = start().await;
    let _a = register(addr, "A1", "ROOM01", Role::Sharer).await;
    let mut c = register(addr, "C1", "ROOM02", Role::Sharer).await;

    assert_eq!(
        list(&mut c, "ROOM02").await,
        vec![PeerSummary {
            id: "C1".into(),
            is_sharer: true
        }]
    );
    assert!(list(&mut c, "MISSING").await.is_empty());
}
