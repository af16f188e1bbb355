//! Canvas engine — the single entry point for user-initiated mutation
//!
//! `dispatch` translates a user intent into one or more stamped
//! operations, runs the optimistic guard check, records the group as one
//! history transaction, applies it to the store, and hands the accepted
//! operations back for broadcast. Locked members of a group operation
//! are silently excluded; the rest proceed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::guard::{self, CurrentUser};
use crate::history::{HistoryManager, HistoryOutcome, Transaction};
use crate::model::{
    Connection, ConnectionStyle, Entity, EntityId, GraphSnapshot, Node, NodeKind, Point, Size,
};
use crate::op::{EntityPatch, LogicalClock, NodePatch, Operation, OperationKind};
use crate::store::{AppliedEffect, GraphStore};

/// Alignment edge for `GroupAlign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    Left,
    Right,
    Top,
    Bottom,
    CenterX,
    CenterY,
}

/// Axis for `GroupDistribute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributeAxis {
    Horizontal,
    Vertical,
}

/// Everything a user can ask the canvas to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum UserIntent {
    CreateNode {
        kind: NodeKind,
        position: Point,
        size: Size,
        content: serde_json::Value,
    },
    CreateConnection {
        source: EntityId,
        target: EntityId,
        source_anchor: f32,
        target_anchor: f32,
        style: ConnectionStyle,
    },
    /// Group drag: every id moves by the same delta.
    Move {
        ids: Vec<EntityId>,
        dx: f64,
        dy: f64,
    },
    Resize {
        id: EntityId,
        size: Size,
    },
    /// Replace a node's opaque content payload.
    SetContent {
        id: EntityId,
        content: serde_json::Value,
    },
    Delete {
        ids: Vec<EntityId>,
    },
    Lock {
        id: EntityId,
    },
    Unlock {
        id: EntityId,
    },
    /// Align the current selection.
    GroupAlign {
        mode: AlignMode,
    },
    /// Distribute the current selection with equal gaps.
    GroupDistribute {
        axis: DistributeAxis,
    },
}

/// What a dispatch produced: the operations to broadcast, the effects
/// for the spatial index, and any group members excluded by lock state.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub ops: Vec<Operation>,
    pub effects: Vec<AppliedEffect>,
    pub excluded: Vec<EntityId>,
}

/// An in-flight pointer gesture, previewed but not yet applied.
///
/// Nothing reaches the store or the wire until commit, so Escape simply
/// discards it — no rollback needed.
#[derive(Debug, Clone)]
struct PendingDrag {
    ids: Vec<EntityId>,
    dx: f64,
    dy: f64,
}

/// One participant's canvas session: store, history, clock, selection.
pub struct CanvasEngine {
    store: GraphStore,
    history: HistoryManager,
    clock: LogicalClock,
    user: CurrentUser,
    selection: HashSet<EntityId>,
    pending_drag: Option<PendingDrag>,
}

impl CanvasEngine {
    pub fn new(user: CurrentUser) -> Self {
        Self::with_store(user, GraphStore::new())
    }

    pub fn with_store(user: CurrentUser, store: GraphStore) -> Self {
        CanvasEngine {
            store,
            history: HistoryManager::new(),
            clock: LogicalClock::new(user.id),
            user,
            selection: HashSet::new(),
            pending_drag: None,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.store.snapshot()
    }

    /// Replace local state wholesale (initial load, reconnect recovery).
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.store.restore(snapshot);
    }

    /// Apply an operation received from a peer. Advances the clock so
    /// later local writes order after it.
    pub fn apply_remote(&mut self, op: &Operation) -> Result<AppliedEffect, Rejection> {
        self.clock.observe(op.stamp);
        self.store.apply(op, None)
    }

    /// Re-stamp and re-apply a locally originated operation after a
    /// snapshot restore. Not recorded in history; the transaction that
    /// produced it already is.
    pub fn reapply(&mut self, kind: OperationKind) -> Result<(Operation, AppliedEffect), Rejection> {
        let op = Operation::new(self.clock.tick(), kind);
        let effect = self.store.apply(&op, Some(&self.user))?;
        Ok((op, effect))
    }

    /// Subscribe to entity-changed notifications (renderer invalidation).
    pub fn on_entity_changed(&mut self, callback: impl Fn(&[EntityId]) + Send + Sync + 'static) {
        self.store.on_entity_changed(callback);
    }

    // ── Selection (ephemeral, client-local, never synced) ──

    pub fn select(&mut self, id: EntityId) {
        if self.store.contains(id) {
            self.selection.insert(id);
        }
    }

    pub fn deselect(&mut self, id: EntityId) {
        self.selection.remove(&id);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.selection.iter().copied()
    }

    // ── Gestures ────────────────────────────────────────────

    /// Start a drag. Fails up front if every grabbed entity is locked,
    /// so the UI never begins a doomed gesture; locked members of a
    /// multi-grab are excluded instead.
    pub fn begin_drag(&mut self, ids: Vec<EntityId>) -> Result<(), Rejection> {
        let movable = self.filter_unlocked(&ids).0;
        if movable.is_empty() {
            if let Some(&id) = ids.first() {
                let entity = self.store.get(id).ok_or(Rejection::NotFound(id))?;
                guard::check(
                    &OperationKind::Move {
                        id,
                        to: Point::default(),
                    },
                    Some(&entity),
                    Some(&self.user),
                )?;
            }
            return Ok(());
        }
        self.pending_drag = Some(PendingDrag {
            ids: movable,
            dx: 0.0,
            dy: 0.0,
        });
        Ok(())
    }

    /// Update the preview delta of the in-flight drag.
    pub fn update_drag(&mut self, dx: f64, dy: f64) {
        if let Some(drag) = &mut self.pending_drag {
            drag.dx = dx;
            drag.dy = dy;
        }
    }

    /// Discard the in-flight drag. Nothing was applied or broadcast.
    pub fn cancel_drag(&mut self) {
        self.pending_drag = None;
    }

    /// Commit the in-flight drag as a single move transaction.
    pub fn commit_drag(&mut self) -> Result<DispatchOutcome, Rejection> {
        let Some(drag) = self.pending_drag.take() else {
            return Ok(DispatchOutcome::default());
        };
        if drag.dx == 0.0 && drag.dy == 0.0 {
            return Ok(DispatchOutcome::default());
        }
        self.dispatch(UserIntent::Move {
            ids: drag.ids,
            dx: drag.dx,
            dy: drag.dy,
        })
    }

    // ── Dispatch ────────────────────────────────────────────

    /// Translate a user intent into operations, apply them as one
    /// history transaction, and return what to broadcast.
    pub fn dispatch(&mut self, intent: UserIntent) -> Result<DispatchOutcome, Rejection> {
        match intent {
            UserIntent::CreateNode {
                kind,
                position,
                size,
                content,
            } => {
                let node = Node {
                    id: EntityId::new(),
                    kind,
                    position,
                    size,
                    z_index: self.next_z_index(),
                    content,
                    created_by: self.user.id,
                    locked: false,
                    revision: 0,
                    stamps: Default::default(),
                };
                self.commit("create", vec![OperationKind::CreateNode { node }], Vec::new())
            }
            UserIntent::CreateConnection {
                source,
                target,
                source_anchor,
                target_anchor,
                style,
            } => {
                let connection = Connection {
                    id: EntityId::new(),
                    source,
                    target,
                    source_anchor: source_anchor.clamp(0.0, 1.0),
                    target_anchor: target_anchor.clamp(0.0, 1.0),
                    style,
                    created_by: self.user.id,
                    revision: 0,
                    stamps: Default::default(),
                };
                self.commit(
                    "connect",
                    vec![OperationKind::CreateConnection { connection }],
                    Vec::new(),
                )
            }
            UserIntent::Move { ids, dx, dy } => {
                let (movable, excluded) = self.filter_unlocked(&ids);
                if movable.is_empty() && !excluded.is_empty() && ids.len() == 1 {
                    return Err(self.locked_rejection(ids[0]));
                }
                let kinds: Vec<OperationKind> = movable
                    .iter()
                    .filter_map(|&id| {
                        let node = self.store.node(id)?;
                        Some(OperationKind::Move {
                            id,
                            to: Point::new(node.position.x + dx, node.position.y + dy),
                        })
                    })
                    .collect();
                self.commit("move", kinds, excluded)
            }
            UserIntent::Resize { id, size } => {
                self.single_node_update(
                    "resize",
                    id,
                    NodePatch {
                        size: Some(size),
                        ..Default::default()
                    },
                )
            }
            UserIntent::SetContent { id, content } => {
                self.single_node_update(
                    "edit",
                    id,
                    NodePatch {
                        content: Some(content),
                        ..Default::default()
                    },
                )
            }
            UserIntent::Delete { ids } => {
                let mut nodes = Vec::new();
                let mut connections = Vec::new();
                let mut excluded = Vec::new();
                for id in ids {
                    match self.store.get(id) {
                        Some(Entity::Node(node)) if node.locked => excluded.push(id),
                        Some(Entity::Node(_)) => nodes.push(id),
                        Some(Entity::Connection(_)) => connections.push(id),
                        None => {}
                    }
                }
                if nodes.is_empty() && connections.is_empty() {
                    if let Some(&id) = excluded.first() {
                        return Err(self.locked_rejection(id));
                    }
                    return Ok(DispatchOutcome::default());
                }
                // Cascade computed here, once, so peers receive the node
                // and its connections as one atomic delete.
                let mut entities = self.store.cascade_targets(&nodes);
                for id in connections {
                    if !entities.contains(&id) {
                        entities.push(id);
                    }
                }
                for id in &entities {
                    self.selection.remove(id);
                }
                self.commit("delete", vec![OperationKind::Delete { entities }], excluded)
            }
            UserIntent::Lock { id } => {
                self.commit("lock", vec![OperationKind::LockToggle { id, locked: true }], Vec::new())
            }
            UserIntent::Unlock { id } => self.commit(
                "unlock",
                vec![OperationKind::LockToggle { id, locked: false }],
                Vec::new(),
            ),
            UserIntent::GroupAlign { mode } => {
                let (ids, excluded) = self.participating_selection();
                let kinds = self.align_kinds(&ids, mode);
                self.commit("align", kinds, excluded)
            }
            UserIntent::GroupDistribute { axis } => {
                let (ids, excluded) = self.participating_selection();
                let kinds = self.distribute_kinds(&ids, axis);
                self.commit("distribute", kinds, excluded)
            }
        }
    }

    /// Undo the most recent local transaction. Returns operations to
    /// broadcast, or an empty outcome when there was nothing to undo.
    pub fn undo(&mut self) -> DispatchOutcome {
        let outcome = self
            .history
            .undo(&mut self.store, &mut self.clock, Some(&self.user));
        Self::history_outcome(outcome)
    }

    /// Re-apply the most recently undone transaction.
    pub fn redo(&mut self) -> DispatchOutcome {
        let outcome = self
            .history
            .redo(&mut self.store, &mut self.clock, Some(&self.user));
        Self::history_outcome(outcome)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ── Internals ───────────────────────────────────────────

    fn history_outcome(outcome: HistoryOutcome) -> DispatchOutcome {
        match outcome {
            HistoryOutcome::Applied { ops, effects } => DispatchOutcome {
                ops,
                effects,
                excluded: Vec::new(),
            },
            HistoryOutcome::NothingToDo => DispatchOutcome::default(),
        }
    }

    /// Stamp, capture, apply, and record a batch as one transaction.
    fn commit(
        &mut self,
        label: &str,
        kinds: Vec<OperationKind>,
        excluded: Vec<EntityId>,
    ) -> Result<DispatchOutcome, Rejection> {
        let mut transaction = Transaction::new(label);
        let mut ops = Vec::new();
        let mut effects = Vec::new();
        for kind in kinds {
            // Capture pre-state for every entity this op touches, before
            // applying anything; undo works from these.
            match &kind {
                OperationKind::Delete { entities } => {
                    for &id in entities {
                        transaction.capture(&self.store, id);
                    }
                }
                other => {
                    if let Some(id) = other.primary_target() {
                        transaction.capture(&self.store, id);
                    }
                }
            }
            let op = Operation::new(self.clock.tick(), kind);
            let effect = self.store.apply(&op, Some(&self.user))?;
            if !effect.is_noop() {
                transaction.push(op.clone());
                ops.push(op);
                effects.push(effect);
            }
        }
        self.history.record(transaction);
        Ok(DispatchOutcome {
            ops,
            effects,
            excluded,
        })
    }

    fn single_node_update(
        &mut self,
        label: &str,
        id: EntityId,
        patch: NodePatch,
    ) -> Result<DispatchOutcome, Rejection> {
        if self.store.node(id).map(|n| n.locked).unwrap_or(false) {
            return Err(self.locked_rejection(id));
        }
        self.commit(
            label,
            vec![OperationKind::Update {
                id,
                patch: EntityPatch::Node(patch),
            }],
            Vec::new(),
        )
    }

    fn locked_rejection(&self, id: EntityId) -> Rejection {
        Rejection::Forbidden {
            entity: id,
            reason: crate::error::DenyReason::Locked,
        }
    }

    /// Split ids into movable nodes and lock-excluded ones.
    fn filter_unlocked(&self, ids: &[EntityId]) -> (Vec<EntityId>, Vec<EntityId>) {
        let mut movable = Vec::new();
        let mut excluded = Vec::new();
        for &id in ids {
            match self.store.node(id) {
                Some(node) if node.locked => excluded.push(id),
                Some(_) => movable.push(id),
                None => {}
            }
        }
        (movable, excluded)
    }

    /// Unlocked nodes of the current selection, in stable order.
    fn participating_selection(&self) -> (Vec<EntityId>, Vec<EntityId>) {
        let mut ids: Vec<EntityId> = self.selection.iter().copied().collect();
        ids.sort();
        self.filter_unlocked(&ids)
    }

    fn next_z_index(&self) -> i32 {
        self.store
            .query_all()
            .iter()
            .filter_map(|e| e.as_node().map(|n| n.z_index))
            .max()
            .map(|z| z + 1)
            .unwrap_or(0)
    }

    fn align_kinds(&self, ids: &[EntityId], mode: AlignMode) -> Vec<OperationKind> {
        let nodes: Vec<&Node> = ids.iter().filter_map(|&id| self.store.node(id)).collect();
        if nodes.len() < 2 {
            return Vec::new();
        }
        let min_x = nodes.iter().map(|n| n.position.x).fold(f64::MAX, f64::min);
        let max_x = nodes
            .iter()
            .map(|n| n.position.x + n.size.w)
            .fold(f64::MIN, f64::max);
        let min_y = nodes.iter().map(|n| n.position.y).fold(f64::MAX, f64::min);
        let max_y = nodes
            .iter()
            .map(|n| n.position.y + n.size.h)
            .fold(f64::MIN, f64::max);
        nodes
            .iter()
            .filter_map(|node| {
                let to = match mode {
                    AlignMode::Left => Point::new(min_x, node.position.y),
                    AlignMode::Right => Point::new(max_x - node.size.w, node.position.y),
                    AlignMode::Top => Point::new(node.position.x, min_y),
                    AlignMode::Bottom => Point::new(node.position.x, max_y - node.size.h),
                    AlignMode::CenterX => Point::new(
                        (min_x + max_x) / 2.0 - node.size.w / 2.0,
                        node.position.y,
                    ),
                    AlignMode::CenterY => Point::new(
                        node.position.x,
                        (min_y + max_y) / 2.0 - node.size.h / 2.0,
                    ),
                };
                if to == node.position {
                    None
                } else {
                    Some(OperationKind::Move { id: node.id, to })
                }
            })
            .collect()
    }

    fn distribute_kinds(&self, ids: &[EntityId], axis: DistributeAxis) -> Vec<OperationKind> {
        let mut nodes: Vec<&Node> = ids.iter().filter_map(|&id| self.store.node(id)).collect();
        if nodes.len() < 3 {
            return Vec::new();
        }
        match axis {
            DistributeAxis::Horizontal => {
                nodes.sort_by(|a, b| a.position.x.total_cmp(&b.position.x))
            }
            DistributeAxis::Vertical => {
                nodes.sort_by(|a, b| a.position.y.total_cmp(&b.position.y))
            }
        }
        let (first, last) = (nodes[0], nodes[nodes.len() - 1]);
        let (span_start, span_end, total_extent) = match axis {
            DistributeAxis::Horizontal => (
                first.position.x,
                last.position.x + last.size.w,
                nodes.iter().map(|n| n.size.w).sum::<f64>(),
            ),
            DistributeAxis::Vertical => (
                first.position.y,
                last.position.y + last.size.h,
                nodes.iter().map(|n| n.size.h).sum::<f64>(),
            ),
        };
        let gap = (span_end - span_start - total_extent) / (nodes.len() - 1) as f64;
        let mut cursor = span_start;
        let mut kinds = Vec::new();
        for node in &nodes {
            let to = match axis {
                DistributeAxis::Horizontal => Point::new(cursor, node.position.y),
                DistributeAxis::Vertical => Point::new(node.position.x, cursor),
            };
            if to != node.position {
                kinds.push(OperationKind::Move { id: node.id, to });
            }
            cursor += match axis {
                DistributeAxis::Horizontal => node.size.w + gap,
                DistributeAxis::Vertical => node.size.h + gap,
            };
        }
        kinds
    }
}
