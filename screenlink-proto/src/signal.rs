//! Signaling envelope types exchanged between browser peers and the relay.
//!
//! [`ClientMessage`] is what a peer sends to the relay, [`ServerMessage`] is
//! what the relay pushes back. Both are internally tagged by `"type"` with
//! kebab-case kinds (`ice-candidate`, `list-peers`, ...) and camelCase
//! field names (`peerId`, `sessionId`, `isSharer`).
//!
//! Handshake payloads are carried as [`Payload`], the sender's JSON text
//! kept byte for byte. Decoding goes through a flat wire struct because the
//! raw payload cannot be captured inside serde's buffered tagged-enum path.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

/// An opaque handshake payload (session description or candidate).
///
/// Holds the exact JSON text the sender put in the envelope. Equality is on
/// that text, so two payloads that differ only in key order or whitespace
/// are different payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wraps already-serialized JSON text without reformatting it.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a single valid JSON value.
    pub fn from_json(json: String) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json).map(Self)
    }

    /// Serializes `value` into a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// The payload's JSON text, exactly as received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parses the payload into a [`Value`] for inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the text holds numbers [`Value`] cannot represent.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Payload {}

/// Why a well-formed JSON object is not a valid envelope.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The `type` is not one this side understands.
    #[error("unknown message type `{0}`")]
    UnknownKind(String),
    /// A field the kind requires is absent.
    #[error("`{kind}` is missing `{field}`")]
    MissingField {
        /// Wire name of the message kind.
        kind: &'static str,
        /// camelCase name of the missing field.
        field: &'static str,
    },
}

fn required<T>(
    value: Option<T>,
    kind: &'static str,
    field: &'static str,
) -> Result<T, EnvelopeError> {
    value.ok_or(EnvelopeError::MissingField { kind, field })
}

/// A present payload field, `null` included.
fn present_payload<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Payload::deserialize(deserializer).map(Some)
}

/// The part a peer plays in a session.
///
/// Informational only: the relay uses it to tag `peer-list` entries and
/// never enforces how many sharers a session has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The peer capturing and offering its screen.
    Sharer,
    /// A peer watching the shared screen.
    Viewer,
}

impl Role {
    /// Returns `true` for [`Role::Sharer`].
    #[must_use]
    pub const fn is_sharer(self) -> bool {
        matches!(self, Self::Sharer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sharer => write!(f, "sharer"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

/// Messages a peer sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    try_from = "ClientWire"
)]
pub enum ClientMessage {
    /// Announce this connection as `peer_id` inside `session_id`.
    Register {
        /// Identifier chosen by the client.
        peer_id: String,
        /// Join code of the session to enter.
        session_id: String,
        /// Whether the peer shares or views.
        role: Role,
    },

    /// Session description offer for `target`.
    Offer {
        /// `peerId` of the recipient.
        target: String,
        /// Opaque offer payload.
        offer: Payload,
    },

    /// Session description answer for `target`.
    Answer {
        /// `peerId` of the recipient.
        target: String,
        /// Opaque answer payload.
        answer: Payload,
    },

    /// Connectivity candidate for `target`.
    IceCandidate {
        /// `peerId` of the recipient.
        target: String,
        /// Opaque candidate payload.
        candidate: Payload,
    },

    /// Ask who is currently registered under `session_id`.
    ListPeers {
        /// Join code of the session to list.
        session_id: String,
    },

    /// Application-level keepalive; answered with [`ServerMessage::Pong`].
    Ping,
}

impl ClientMessage {
    /// Wire name of this message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ListPeers { .. } => "list-peers",
            Self::Ping => "ping",
        }
    }
}

/// Every field a client envelope may carry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientWire {
    #[serde(rename = "type")]
    kind: String,
    peer_id: Option<String>,
    session_id: Option<String>,
    role: Option<Role>,
    target: Option<String>,
    #[serde(default, deserialize_with = "present_payload")]
    offer: Option<Payload>,
    #[serde(default, deserialize_with = "present_payload")]
    answer: Option<Payload>,
    #[serde(default, deserialize_with = "present_payload")]
    candidate: Option<Payload>,
}

impl TryFrom<ClientWire> for ClientMessage {
    type Error = EnvelopeError;

    fn try_from(wire: ClientWire) -> Result<Self, Self::Error> {
        match wire.kind.as_str() {
            "register" => Ok(Self::Register {
                peer_id: required(wire.peer_id, "register", "peerId")?,
                session_id: required(wire.session_id, "register", "sessionId")?,
                role: required(wire.role, "register", "role")?,
            }),
            "offer" => Ok(Self::Offer {
                target: required(wire.target, "offer", "target")?,
                offer: required(wire.offer, "offer", "offer")?,
            }),
            "answer" => Ok(Self::Answer {
                target: required(wire.target, "answer", "target")?,
                answer: required(wire.answer, "answer", "answer")?,
            }),
            "ice-candidate" => Ok(Self::IceCandidate {
                target: required(wire.target, "ice-candidate", "target")?,
                candidate: required(wire.candidate, "ice-candidate", "candidate")?,
            }),
            "list-peers" => Ok(Self::ListPeers {
                session_id: required(wire.session_id, "list-peers", "sessionId")?,
            }),
            "ping" => Ok(Self::Ping),
            _ => Err(EnvelopeError::UnknownKind(wire.kind)),
        }
    }
}

/// One row of a `peer-list` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    /// The peer's `peerId`.
    pub id: String,
    /// `true` if the peer registered as a sharer.
    pub is_sharer: bool,
}

/// Messages the relay sends to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    try_from = "ServerWire"
)]
pub enum ServerMessage {
    /// Registration accepted.
    Registered {
        /// The registered `peerId`, echoed back.
        peer_id: String,
        /// The session the peer joined.
        session_id: String,
    },

    /// Offer forwarded from `from`.
    Offer {
        /// `peerId` of the sender, as registered on its connection.
        from: String,
        /// The offer payload, untouched.
        offer: Payload,
    },

    /// Answer forwarded from `from`.
    Answer {
        /// `peerId` of the sender.
        from: String,
        /// The answer payload, untouched.
        answer: Payload,
    },

    /// Candidate forwarded from `from`.
    IceCandidate {
        /// `peerId` of the sender.
        from: String,
        /// The candidate payload, untouched.
        candidate: Payload,
    },

    /// Reply to `list-peers`.
    PeerList {
        /// The session that was listed.
        session_id: String,
        /// Current members; empty when the session does not exist.
        peers: Vec<PeerSummary>,
    },

    /// Something about the sender's last message could not be handled.
    Error {
        /// Human-readable description.
        message: String,
    },

    /// Reply to [`ClientMessage::Ping`].
    Pong,
}

impl ServerMessage {
    /// Builds an [`ServerMessage::Error`] with the given text.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerWire {
    #[serde(rename = "type")]
    kind: String,
    peer_id: Option<String>,
    session_id: Option<String>,
    from: Option<String>,
    #[serde(default, deserialize_with = "present_payload")]
    offer: Option<Payload>,
    #[serde(default, deserialize_with = "present_payload")]
    answer: Option<Payload>,
    #[serde(default, deserialize_with = "present_payload")]
    candidate: Option<Payload>,
    peers: Option<Vec<PeerSummary>>,
    message: Option<String>,
}

impl TryFrom<ServerWire> for ServerMessage {
    type Error = EnvelopeError;

    fn try_from(wire: ServerWire) -> Result<Self, EnvelopeError> {
        match wire.kind.as_str() {
            "registered" => Ok(Self::Registered {
                peer_id: required(wire.peer_id, "registered", "peerId")?,
                session_id: required(wire.session_id, "registered", "sessionId")?,
            }),
            "offer" => Ok(Self::Offer {
                from: required(wire.from, "offer", "from")?,
                offer: required(wire.offer, "offer", "offer")?,
            }),
            "answer" => Ok(Self::Answer {
                from: required(wire.from, "answer", "from")?,
                answer: required(wire.answer, "answer", "answer")?,
            }),
            "ice-candidate" => Ok(Self::IceCandidate {
                from: required(wire.from, "ice-candidate", "from")?,
                candidate: required(wire.candidate, "ice-candidate", "candidate")?,
            }),
            "peer-list" => Ok(Self::PeerList {
                session_id: required(wire.session_id, "peer-list", "sessionId")?,
                peers: required(wire.peers, "peer-list", "peers")?,
            }),
            "error" => Ok(Self::Error {
                message: required(wire.message, "error", "message")?,
            }),
            "pong" => Ok(Self::Pong),
            _ => Err(EnvelopeError::UnknownKind(wire.kind)),
        }
    }
}
