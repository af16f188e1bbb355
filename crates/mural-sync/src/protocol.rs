//! Wire messages exchanged between canvas clients and the relay server
//!
//! Everything is JSON text frames. The relay never interprets operation
//! payloads beyond the authoritative guard check; clients do all merge
//! work locally.

use serde::{Deserialize, Serialize};

use mural_core::{ActorId, EntityId, GraphSnapshot, Operation, Point, Role};

/// Ephemeral per-user state shown to other participants. Overwritten
/// wholesale by each update, never merged, dropped when the user leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub actor: ActorId,
    pub cursor: Point,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selection: Vec<EntityId>,
    /// Entity the user is actively editing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editing: Option<EntityId>,
    /// Sender-local sequence number; receivers keep the highest seen so
    /// reordered frames cannot roll a cursor backwards.
    pub seq: u64,
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First frame after connecting: who this is.
    #[serde(rename = "hello")]
    Hello { actor: ActorId, role: Role },
    /// A locally applied operation to relay to peers.
    #[serde(rename = "op")]
    Op { op: Operation },
    /// Cursor/selection update.
    #[serde(rename = "presence")]
    Presence { state: PresenceState },
    /// Ask for a full snapshot (reconnect recovery).
    #[serde(rename = "request_snapshot")]
    RequestSnapshot,
    #[serde(rename = "ping")]
    Ping,
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Reply to `Hello`: the full current canvas.
    #[serde(rename = "welcome")]
    Welcome { snapshot: GraphSnapshot },
    /// Reply to `RequestSnapshot`.
    #[serde(rename = "snapshot")]
    Snapshot { snapshot: GraphSnapshot },
    /// An operation from a peer (or this client's own echo).
    #[serde(rename = "op")]
    Op { op: Operation },
    /// A peer's presence update.
    #[serde(rename = "presence")]
    Presence { state: PresenceState },
    /// A peer disconnected; drop its presence.
    #[serde(rename = "peer_left")]
    PeerLeft { actor: ActorId },
    /// The authoritative guard refused an operation this client sent.
    #[serde(rename = "rejected")]
    Rejected { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}
