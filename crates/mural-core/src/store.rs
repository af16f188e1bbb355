//! Graph store — single source of truth for materialized canvas state
//!
//! Backed by `petgraph::StableDiGraph` so node deletion can enumerate
//! incident connections cheaply, with UUID→index maps on top. All
//! mutation flows through [`GraphStore::apply`]; no component touches
//! entity fields directly. The spatial index consumes the bounding-box
//! deltas returned in [`AppliedEffect`] and holds no authoritative data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::error::Rejection;
use crate::guard::{self, CurrentUser};
use crate::model::{
    Connection, Entity, EntityId, GraphSnapshot, LogicalTimestamp, Node, Rect,
};
use crate::op::{EntityPatch, Operation, OperationKind};

/// Bounding-box change the spatial index must absorb.
#[derive(Debug, Clone, PartialEq)]
pub enum BBoxDelta {
    Insert { id: EntityId, bbox: Rect },
    Update { id: EntityId, bbox: Rect },
    Remove { id: EntityId },
}

/// What an accepted operation did: which entities changed (for renderer
/// invalidation) and how bounding boxes moved (for the spatial index).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedEffect {
    pub changed: Vec<EntityId>,
    pub deltas: Vec<BBoxDelta>,
}

impl AppliedEffect {
    /// Accepted but had no effect: stale stamp, duplicate create, or a
    /// late operation against a tombstoned entity.
    pub fn noop() -> Self {
        AppliedEffect::default()
    }

    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Marker kept after deletion so late-arriving operations referencing
/// the id no-op instead of resurrecting it.
#[derive(Debug, Clone, Copy)]
struct Tombstone {
    stamp: LogicalTimestamp,
    deleted_at: Instant,
}

type ChangeCallback = Box<dyn Fn(&[EntityId]) + Send + Sync>;

/// Authoritative in-memory canvas state for one open workspace session.
///
/// Constructed once per session and passed by reference to every
/// component that needs it; there is no ambient global.
pub struct GraphStore {
    graph: StableDiGraph<Node, Connection>,
    nodes: HashMap<EntityId, NodeIndex>,
    connections: HashMap<EntityId, EdgeIndex>,
    tombstones: HashMap<EntityId, Tombstone>,
    subscribers: Vec<ChangeCallback>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("node_count", &self.nodes.len())
            .field("connection_count", &self.connections.len())
            .field("tombstone_count", &self.tombstones.len())
            .finish()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore {
            graph: StableDiGraph::new(),
            nodes: HashMap::new(),
            connections: HashMap::new(),
            tombstones: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Build a store from a loaded or received snapshot.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut store = GraphStore::new();
        store.restore(snapshot);
        store
    }

    /// Subscribe to entity-changed notifications, fired after every
    /// accepted operation (local or remote) with the affected ids.
    pub fn on_entity_changed(&mut self, callback: impl Fn(&[EntityId]) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    // ── Reads ───────────────────────────────────────────────

    pub fn node(&self, id: EntityId) -> Option<&Node> {
        self.nodes.get(&id).and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn connection(&self, id: EntityId) -> Option<&Connection> {
        self.connections
            .get(&id)
            .and_then(|idx| self.graph.edge_weight(*idx))
    }

    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.node(id)
            .cloned()
            .map(Entity::Node)
            .or_else(|| self.connection(id).cloned().map(Entity::Connection))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(&id) || self.connections.contains_key(&id)
    }

    pub fn is_tombstoned(&self, id: EntityId) -> bool {
        self.tombstones.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Every materialized entity. Bulk export only, not a hot path.
    pub fn query_all(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self
            .graph
            .node_weights()
            .cloned()
            .map(Entity::Node)
            .collect();
        all.extend(self.graph.edge_weights().cloned().map(Entity::Connection));
        all
    }

    /// Current bounding box of an entity, if present.
    pub fn entity_bbox(&self, id: EntityId) -> Option<Rect> {
        if let Some(node) = self.node(id) {
            return Some(node.bbox());
        }
        self.connection(id).and_then(|c| self.connection_bbox(c))
    }

    /// Box spanning both endpoint positions of a connection.
    pub fn connection_bbox(&self, connection: &Connection) -> Option<Rect> {
        let source = self.node(connection.source)?;
        let target = self.node(connection.target)?;
        Some(Rect::spanning(
            source.bbox().center(),
            target.bbox().center(),
        ))
    }

    /// Connections with `node_id` as either endpoint.
    pub fn incident_connections(&self, node_id: EntityId) -> Vec<EntityId> {
        let Some(&idx) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        let mut out: Vec<EntityId> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight().id)
            .collect();
        out.extend(
            self.graph
                .edges_directed(idx, Direction::Incoming)
                .map(|e| e.weight().id),
        );
        out.sort();
        out.dedup();
        out
    }

    /// Cascade set for deleting `node_ids`: the nodes themselves plus
    /// every incident connection. Computed once at operation-creation
    /// time so the whole cascade ships as one multi-entity delete.
    pub fn cascade_targets(&self, node_ids: &[EntityId]) -> Vec<EntityId> {
        let mut targets = Vec::new();
        for &id in node_ids {
            for conn in self.incident_connections(id) {
                if !targets.contains(&conn) {
                    targets.push(conn);
                }
            }
        }
        for &id in node_ids {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        targets
    }

    // ── Snapshots ───────────────────────────────────────────

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.graph.node_weights().cloned().collect(),
            connections: self.graph.edge_weights().cloned().collect(),
        }
    }

    /// Replace all state with a snapshot. Used on initial load and on
    /// reconnection recovery; tombstones are dropped since the snapshot
    /// is the new baseline.
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.graph = StableDiGraph::new();
        self.nodes.clear();
        self.connections.clear();
        self.tombstones.clear();
        for node in snapshot.nodes {
            let id = node.id;
            let idx = self.graph.add_node(node);
            self.nodes.insert(id, idx);
        }
        for connection in snapshot.connections {
            let (Some(&src), Some(&dst)) = (
                self.nodes.get(&connection.source),
                self.nodes.get(&connection.target),
            ) else {
                tracing::warn!(
                    connection = %connection.id,
                    "snapshot contained connection with missing endpoint, dropping"
                );
                continue;
            };
            let id = connection.id;
            let idx = self.graph.add_edge(src, dst, connection);
            self.connections.insert(id, idx);
        }
    }

    /// Drop tombstones older than `max_age`. Returns how many were
    /// collected. Late operations against collected ids surface as
    /// `NotFound`; the session parks them briefly, then drops them as
    /// orphans.
    pub fn collect_tombstones(&mut self, max_age: Duration) -> usize {
        let before = self.tombstones.len();
        self.tombstones
            .retain(|_, stone| stone.deleted_at.elapsed() < max_age);
        before - self.tombstones.len()
    }

    // ── Mutation ────────────────────────────────────────────

    /// Apply one operation. The only mutation entry point.
    ///
    /// Returns the effect on success; `NotFound`/`Forbidden` rejections
    /// leave the store untouched. Operations against tombstoned
    /// entities, duplicate creates, and stale per-field writes are
    /// accepted as no-ops so delivery order and redelivery never
    /// diverge replicas.
    pub fn apply(
        &mut self,
        op: &Operation,
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        let effect = match &op.kind {
            OperationKind::CreateNode { node } => self.apply_create_node(op, node, user)?,
            OperationKind::CreateConnection { connection } => {
                self.apply_create_connection(op, connection, user)?
            }
            OperationKind::Update { id, patch } => self.apply_update(op, *id, patch, user)?,
            OperationKind::Move { id, to } => {
                let patch = EntityPatch::Node(crate::op::NodePatch {
                    position: Some(*to),
                    ..Default::default()
                });
                self.apply_update(op, *id, &patch, user)?
            }
            OperationKind::Delete { entities } => self.apply_delete(op, entities, user)?,
            OperationKind::LockToggle { id, locked } => {
                self.apply_lock_toggle(op, *id, *locked, user)?
            }
        };

        if !effect.is_noop() {
            for subscriber in &self.subscribers {
                subscriber(&effect.changed);
            }
        }
        Ok(effect)
    }

    fn apply_create_node(
        &mut self,
        op: &Operation,
        node: &Node,
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        guard::check(&op.kind, None, user)?;
        if self.nodes.contains_key(&node.id) {
            return Ok(AppliedEffect::noop());
        }
        if let Some(stone) = self.tombstones.get(&node.id) {
            // A create newer than the delete is an explicit resurrection
            // (undo of a delete); an older one is a late duplicate.
            if op.stamp <= stone.stamp {
                return Ok(AppliedEffect::noop());
            }
            self.tombstones.remove(&node.id);
        }
        let mut node = node.clone();
        node.revision = 0;
        node.stamps = crate::model::NodeStamps {
            position: op.stamp,
            size: op.stamp,
            z_index: op.stamp,
            content: op.stamp,
            locked: op.stamp,
        };
        let id = node.id;
        let bbox = node.bbox();
        let idx = self.graph.add_node(node);
        self.nodes.insert(id, idx);
        Ok(AppliedEffect {
            changed: vec![id],
            deltas: vec![BBoxDelta::Insert { id, bbox }],
        })
    }

    fn apply_create_connection(
        &mut self,
        op: &Operation,
        connection: &Connection,
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        guard::check(&op.kind, None, user)?;
        if self.connections.contains_key(&connection.id) {
            return Ok(AppliedEffect::noop());
        }
        if let Some(stone) = self.tombstones.get(&connection.id) {
            if op.stamp <= stone.stamp {
                return Ok(AppliedEffect::noop());
            }
            self.tombstones.remove(&connection.id);
        }
        // A connection to a deleted endpoint is dead on arrival, not an
        // error: the endpoint's delete simply won the race.
        for endpoint in [connection.source, connection.target] {
            if self.is_tombstoned(endpoint) {
                return Ok(AppliedEffect::noop());
            }
        }
        let (Some(&src), Some(&dst)) = (
            self.nodes.get(&connection.source),
            self.nodes.get(&connection.target),
        ) else {
            let missing = if self.nodes.contains_key(&connection.source) {
                connection.target
            } else {
                connection.source
            };
            return Err(Rejection::MissingEndpoint(missing));
        };
        let mut connection = connection.clone();
        connection.revision = 0;
        connection.stamps = crate::model::ConnectionStamps {
            anchors: op.stamp,
            style: op.stamp,
        };
        let id = connection.id;
        let idx = self.graph.add_edge(src, dst, connection);
        self.connections.insert(id, idx);
        let bbox = self
            .connection(id)
            .and_then(|c| self.connection_bbox(c))
            .unwrap_or_default();
        Ok(AppliedEffect {
            changed: vec![id],
            deltas: vec![BBoxDelta::Insert { id, bbox }],
        })
    }

    fn apply_update(
        &mut self,
        op: &Operation,
        id: EntityId,
        patch: &EntityPatch,
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        if self.is_tombstoned(id) {
            return Ok(AppliedEffect::noop());
        }
        let entity = self.get(id).ok_or(Rejection::NotFound(id))?;
        guard::check(&op.kind, Some(&entity), user)?;

        match patch {
            EntityPatch::Node(patch) => {
                let Some(&idx) = self.nodes.get(&id) else {
                    return Ok(AppliedEffect::noop());
                };
                let node = self
                    .graph
                    .node_weight_mut(idx)
                    .ok_or(Rejection::NotFound(id))?;
                let mut applied = false;
                let mut geometry_changed = false;
                if let Some(position) = patch.position {
                    if op.stamp > node.stamps.position {
                        node.position = position;
                        node.stamps.position = op.stamp;
                        applied = true;
                        geometry_changed = true;
                    }
                }
                if let Some(size) = patch.size {
                    if op.stamp > node.stamps.size {
                        node.size = size;
                        node.stamps.size = op.stamp;
                        applied = true;
                        geometry_changed = true;
                    }
                }
                if let Some(z_index) = patch.z_index {
                    if op.stamp > node.stamps.z_index {
                        node.z_index = z_index;
                        node.stamps.z_index = op.stamp;
                        applied = true;
                    }
                }
                if let Some(content) = &patch.content {
                    if op.stamp > node.stamps.content {
                        node.content = content.clone();
                        node.stamps.content = op.stamp;
                        applied = true;
                    }
                }
                if !applied {
                    return Ok(AppliedEffect::noop());
                }
                node.revision += 1;
                let bbox = node.bbox();
                let mut effect = AppliedEffect {
                    changed: vec![id],
                    deltas: vec![BBoxDelta::Update { id, bbox }],
                };
                if geometry_changed {
                    // Connection boxes derive from endpoint positions;
                    // republish them when an endpoint moves.
                    for conn_id in self.incident_connections(id) {
                        if let Some(bbox) = self
                            .connection(conn_id)
                            .and_then(|c| self.connection_bbox(c))
                        {
                            effect.deltas.push(BBoxDelta::Update { id: conn_id, bbox });
                        }
                    }
                }
                Ok(effect)
            }
            EntityPatch::Connection(patch) => {
                let Some(&idx) = self.connections.get(&id) else {
                    return Ok(AppliedEffect::noop());
                };
                let connection = self
                    .graph
                    .edge_weight_mut(idx)
                    .ok_or(Rejection::NotFound(id))?;
                let mut applied = false;
                if patch.source_anchor.is_some() || patch.target_anchor.is_some() {
                    if op.stamp > connection.stamps.anchors {
                        if let Some(anchor) = patch.source_anchor {
                            connection.source_anchor = anchor.clamp(0.0, 1.0);
                        }
                        if let Some(anchor) = patch.target_anchor {
                            connection.target_anchor = anchor.clamp(0.0, 1.0);
                        }
                        connection.stamps.anchors = op.stamp;
                        applied = true;
                    }
                }
                if let Some(style) = &patch.style {
                    if op.stamp > connection.stamps.style {
                        connection.style = style.clone();
                        connection.stamps.style = op.stamp;
                        applied = true;
                    }
                }
                if !applied {
                    return Ok(AppliedEffect::noop());
                }
                connection.revision += 1;
                let bbox = self
                    .connection(id)
                    .and_then(|c| self.connection_bbox(c))
                    .unwrap_or_default();
                Ok(AppliedEffect {
                    changed: vec![id],
                    deltas: vec![BBoxDelta::Update { id, bbox }],
                })
            }
        }
    }

    fn apply_lock_toggle(
        &mut self,
        op: &Operation,
        id: EntityId,
        locked: bool,
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        if self.is_tombstoned(id) {
            return Ok(AppliedEffect::noop());
        }
        let entity = self.get(id).ok_or(Rejection::NotFound(id))?;
        guard::check(&op.kind, Some(&entity), user)?;
        let Some(&idx) = self.nodes.get(&id) else {
            // Connections carry no lock flag.
            return Ok(AppliedEffect::noop());
        };
        let node = self
            .graph
            .node_weight_mut(idx)
            .ok_or(Rejection::NotFound(id))?;
        if op.stamp <= node.stamps.locked {
            return Ok(AppliedEffect::noop());
        }
        // A same-value write still claims the stamp; otherwise a staler
        // opposite toggle could win after redelivery in another order.
        let changed = node.locked != locked;
        node.locked = locked;
        node.stamps.locked = op.stamp;
        if !changed {
            return Ok(AppliedEffect::noop());
        }
        node.revision += 1;
        Ok(AppliedEffect {
            changed: vec![id],
            deltas: Vec::new(),
        })
    }

    fn apply_delete(
        &mut self,
        op: &Operation,
        entities: &[EntityId],
        user: Option<&CurrentUser>,
    ) -> Result<AppliedEffect, Rejection> {
        // Individual members may have been deleted concurrently and are
        // skipped, but a delete that matches nothing at all is stale
        // client state and is reported as such.
        if !entities.is_empty()
            && entities
                .iter()
                .all(|id| !self.contains(*id) && !self.is_tombstoned(*id))
        {
            return Err(Rejection::NotFound(entities[0]));
        }

        let mut effect = AppliedEffect::default();

        // Connections first: removing a node would drop its incident
        // edges behind our back and leave stale indices in the map.
        for &id in entities {
            if !self.connections.contains_key(&id) {
                continue;
            }
            let entity = self.get(id).ok_or(Rejection::NotFound(id))?;
            guard::check(&op.kind, Some(&entity), user)?;
            self.remove_connection(id, op.stamp, &mut effect);
        }
        for &id in entities {
            let Some(&idx) = self.nodes.get(&id) else {
                continue;
            };
            let entity = self.get(id).ok_or(Rejection::NotFound(id))?;
            // On the authoritative path, locked members of a batch are
            // excluded, not fatal: the origin already filtered them, so
            // one here means a lock raced the delete. The merge path
            // (`user: None`) never skips; see `guard::check`.
            if guard::check(&op.kind, Some(&entity), user).is_err() {
                tracing::debug!(entity = %id, "skipping locked entity in delete batch");
                continue;
            }
            // Cascade safety net for connections created concurrently
            // with the delete and thus absent from the shipped batch.
            for conn_id in self.incident_connections(id) {
                self.remove_connection(conn_id, op.stamp, &mut effect);
            }
            self.graph.remove_node(idx);
            self.nodes.remove(&id);
            self.tombstones.insert(
                id,
                Tombstone {
                    stamp: op.stamp,
                    deleted_at: Instant::now(),
                },
            );
            effect.changed.push(id);
            effect.deltas.push(BBoxDelta::Remove { id });
        }
        Ok(effect)
    }

    fn remove_connection(
        &mut self,
        id: EntityId,
        stamp: LogicalTimestamp,
        effect: &mut AppliedEffect,
    ) {
        let Some(idx) = self.connections.remove(&id) else {
            return;
        };
        self.graph.remove_edge(idx);
        self.tombstones.insert(
            id,
            Tombstone {
                stamp,
                deleted_at: Instant::now(),
            },
        );
        effect.changed.push(id);
        effect.deltas.push(BBoxDelta::Remove { id });
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
