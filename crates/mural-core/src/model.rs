//! Core data structures for the shared canvas

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, stable identifier for a canvas entity (node or connection).
///
/// Assigned once at creation and immutable for the entity's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        EntityId(Uuid::new_v4())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a participant. Stable across sessions for the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        ActorId(Uuid::new_v4())
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lamport timestamp: a logical counter plus the issuing actor.
///
/// Total order is `(time, actor)`, so concurrent writes with the same
/// counter resolve deterministically on every replica without
/// communication. Wall-clock time never participates in ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTimestamp {
    pub time: u64,
    pub actor: ActorId,
}

impl LogicalTimestamp {
    pub fn new(time: u64, actor: ActorId) -> Self {
        LogicalTimestamp { time, actor }
    }

    /// The zero stamp: older than any issued write.
    pub fn zero() -> Self {
        LogicalTimestamp {
            time: 0,
            actor: ActorId(Uuid::nil()),
        }
    }
}

impl Default for LogicalTimestamp {
    fn default() -> Self {
        Self::zero()
    }
}

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Width/height extent of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub fn new(w: f64, h: f64) -> Self {
        Size { w, h }
    }
}

/// Axis-aligned rectangle in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Rect { x, y, w, h }
    }

    pub fn from_pos_size(position: Point, size: Size) -> Self {
        Rect::new(position.x, position.y, size.w, size.h)
    }

    /// Smallest rectangle spanning two points.
    pub fn spanning(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Rect::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.w
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.max_x()
            && other.x <= self.max_x()
            && self.y <= other.max_y()
            && other.y <= self.max_y()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && other.max_x() <= self.max_x()
            && other.max_y() <= self.max_y()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.x <= p.x && p.x <= self.max_x() && self.y <= p.y && p.y <= self.max_y()
    }
}

/// Discriminates what kind of content a node carries.
///
/// A closed set: rendering and serialization switch over the tag, and a
/// new kind is a new variant, not a subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Text,
    Shape,
    Image,
    Sticky,
    Frame,
}

/// Per-field last-writer stamps for a node.
///
/// Each independently mergeable field carries the timestamp of the write
/// that currently owns it. Concurrent updates to disjoint fields both
/// survive; same-field conflicts resolve to the larger stamp on every
/// replica.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeStamps {
    pub position: LogicalTimestamp,
    pub size: LogicalTimestamp,
    pub z_index: LogicalTimestamp,
    pub content: LogicalTimestamp,
    pub locked: LogicalTimestamp,
}

/// A positioned node on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub kind: NodeKind,
    pub position: Point,
    pub size: Size,
    pub z_index: i32,
    /// Opaque payload. The canvas stores and transmits it unchanged;
    /// editor internals live elsewhere.
    pub content: serde_json::Value,
    pub created_by: ActorId,
    pub locked: bool,
    /// Strictly increases on every mutation this replica accepts.
    /// Replica-local bookkeeping, not part of the merge state.
    pub revision: u64,
    pub stamps: NodeStamps,
}

impl Node {
    pub fn bbox(&self) -> Rect {
        Rect::from_pos_size(self.position, self.size)
    }
}

/// Per-field last-writer stamps for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectionStamps {
    pub anchors: LogicalTimestamp,
    pub style: LogicalTimestamp,
}

/// Visual styling for a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStyle {
    pub stroke_width: f32,
    pub color: String,
    pub arrowhead: bool,
}

impl Default for ConnectionStyle {
    fn default() -> Self {
        ConnectionStyle {
            stroke_width: 2.0,
            color: "#888888".to_string(),
            arrowhead: true,
        }
    }
}

/// A directed connection between two nodes.
///
/// Both endpoints must reference nodes present in the store; deleting a
/// node cascades deletion of every connection touching it, atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    /// Normalized position along the source node's perimeter, in [0, 1].
    pub source_anchor: f32,
    pub target_anchor: f32,
    pub style: ConnectionStyle,
    pub created_by: ActorId,
    pub revision: u64,
    pub stamps: ConnectionStamps,
}

/// Either kind of canvas entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Node(Node),
    Connection(Connection),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Node(n) => n.id,
            Entity::Connection(c) => c.id,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Entity::Node(n) => n.revision,
            Entity::Connection(c) => c.revision,
        }
    }

    pub fn created_by(&self) -> ActorId {
        match self {
            Entity::Node(n) => n.created_by,
            Entity::Connection(c) => c.created_by,
        }
    }

    /// Lock flag. Connections carry no lock of their own.
    pub fn locked(&self) -> bool {
        match self {
            Entity::Node(n) => n.locked,
            Entity::Connection(_) => false,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entity::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_connection(&self) -> Option<&Connection> {
        match self {
            Entity::Connection(c) => Some(c),
            _ => None,
        }
    }
}

/// Per-user pan/zoom state. Never shared or merged across users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub user: ActorId,
    pub pan: Point,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(user: ActorId) -> Self {
        Viewport {
            user,
            pan: Point::default(),
            zoom: 1.0,
        }
    }
}

/// Full materialized canvas state, used for initial load and for
/// snapshot-based reconnection recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.connections.is_empty()
    }
}
