//! Operations — the unit of mutation exchanged between history, store,
//! and the synchronization layer.

use serde::{Deserialize, Serialize};

use crate::model::{
    ActorId, Connection, ConnectionStyle, EntityId, LogicalTimestamp, Node, Point, Size,
};

/// Partial update to a node. Absent fields are untouched; each present
/// field merges independently under last-writer-wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.size.is_none()
            && self.z_index.is_none()
            && self.content.is_none()
    }
}

/// Partial update to a connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_anchor: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_anchor: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ConnectionStyle>,
}

impl ConnectionPatch {
    pub fn is_empty(&self) -> bool {
        self.source_anchor.is_none() && self.target_anchor.is_none() && self.style.is_none()
    }
}

/// Patch for either entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityPatch {
    Node(NodePatch),
    Connection(ConnectionPatch),
}

/// The tagged mutation variants. Each carries the minimal diff plus the
/// entity id(s) it touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    /// Materialize a new node. Carries the full initial state.
    CreateNode { node: Node },
    /// Materialize a new connection. Both endpoints must already exist.
    CreateConnection { connection: Connection },
    /// Field-level update to an existing entity.
    Update { id: EntityId, patch: EntityPatch },
    /// Reposition a node. Ships the absolute target so replicas can
    /// merge it as a plain position write.
    Move { id: EntityId, to: Point },
    /// Remove one or more entities. A node delete ships together with
    /// every connection it cascades to, so no replica ever observes a
    /// dangling connection.
    Delete { entities: Vec<EntityId> },
    /// Set or clear a node's lock flag.
    LockToggle { id: EntityId, locked: bool },
}

impl OperationKind {
    /// The entity this operation primarily targets, if single-entity.
    pub fn primary_target(&self) -> Option<EntityId> {
        match self {
            OperationKind::CreateNode { node } => Some(node.id),
            OperationKind::CreateConnection { connection } => Some(connection.id),
            OperationKind::Update { id, .. }
            | OperationKind::Move { id, .. }
            | OperationKind::LockToggle { id, .. } => Some(*id),
            OperationKind::Delete { .. } => None,
        }
    }

    /// Whether this variant mutates an entity that must already exist.
    pub fn requires_existing(&self) -> bool {
        !matches!(
            self,
            OperationKind::CreateNode { .. } | OperationKind::CreateConnection { .. }
        )
    }
}

/// A stamped operation, ready to apply locally or ship to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub stamp: LogicalTimestamp,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(stamp: LogicalTimestamp, kind: OperationKind) -> Self {
        Operation { stamp, kind }
    }

    pub fn actor(&self) -> ActorId {
        self.stamp.actor
    }
}

/// Lamport clock owned by one actor.
///
/// `tick` stamps locally originated operations; `observe` folds in a
/// remote stamp so later local writes order after everything this
/// replica has seen.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    actor: ActorId,
    time: u64,
}

impl LogicalClock {
    pub fn new(actor: ActorId) -> Self {
        LogicalClock { actor, time: 0 }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn now(&self) -> LogicalTimestamp {
        LogicalTimestamp::new(self.time, self.actor)
    }

    /// Advance and return a fresh stamp for a local operation.
    pub fn tick(&mut self) -> LogicalTimestamp {
        self.time += 1;
        LogicalTimestamp::new(self.time, self.actor)
    }

    /// Fold a remote stamp into the clock.
    pub fn observe(&mut self, remote: LogicalTimestamp) {
        self.time = self.time.max(remote.time);
    }
}
