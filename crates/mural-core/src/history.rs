//! Per-user undo/redo that tolerates concurrent remote edits
//!
//! History is a stack of local transactions; a transaction groups the
//! operations of one logical user action (a five-node drag is one
//! transaction of five moves). Undo synthesizes inverse operations from
//! entity state captured when the transaction was recorded, then applies
//! them through the store's normal field-level merge — so a remote edit
//! to an unrelated field survives the undo, and an undo of a field a
//! peer also touched resolves last-writer-wins at undo time.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::guard::CurrentUser;
use crate::model::{Entity, EntityId};
use crate::op::{
    ConnectionPatch, EntityPatch, LogicalClock, NodePatch, Operation, OperationKind,
};
use crate::store::{AppliedEffect, GraphStore};

/// Default bound on remembered transactions; oldest entries evict.
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// One logical user action: its forward operations plus the state of
/// every touched entity as it was before the action ran.
#[derive(Debug, Clone)]
pub struct Transaction {
    label: String,
    ops: Vec<Operation>,
    captured: HashMap<EntityId, Option<Entity>>,
}

impl Transaction {
    pub fn new(label: impl Into<String>) -> Self {
        Transaction {
            label: label.into(),
            ops: Vec::new(),
            captured: HashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Record the pre-action state of `id`. First capture wins, so a
    /// transaction that moves the same node twice keeps the original.
    pub fn capture(&mut self, store: &GraphStore, id: EntityId) {
        self.captured.entry(id).or_insert_with(|| store.get(id));
    }

    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    /// Inverse operations, newest-first, built from captured state.
    fn inverse_kinds(&self) -> Vec<OperationKind> {
        let mut out = Vec::new();
        for op in self.ops.iter().rev() {
            match &op.kind {
                OperationKind::CreateNode { node } => {
                    out.push(OperationKind::Delete {
                        entities: vec![node.id],
                    });
                }
                OperationKind::CreateConnection { connection } => {
                    out.push(OperationKind::Delete {
                        entities: vec![connection.id],
                    });
                }
                OperationKind::Move { id, .. } => {
                    let Some(Some(Entity::Node(before))) = self.captured.get(id) else {
                        continue;
                    };
                    out.push(OperationKind::Move {
                        id: *id,
                        to: before.position,
                    });
                }
                OperationKind::Update { id, patch } => {
                    if let Some(kind) = self.inverse_update(*id, patch) {
                        out.push(kind);
                    }
                }
                OperationKind::LockToggle { id, .. } => {
                    let Some(Some(Entity::Node(before))) = self.captured.get(id) else {
                        continue;
                    };
                    out.push(OperationKind::LockToggle {
                        id: *id,
                        locked: before.locked,
                    });
                }
                OperationKind::Delete { entities } => {
                    // Re-create nodes before the connections that
                    // reference them.
                    let mut connections = Vec::new();
                    for id in entities {
                        match self.captured.get(id) {
                            Some(Some(Entity::Node(node))) => {
                                out.push(OperationKind::CreateNode { node: node.clone() });
                            }
                            Some(Some(Entity::Connection(c))) => connections.push(c.clone()),
                            _ => {}
                        }
                    }
                    for connection in connections {
                        out.push(OperationKind::CreateConnection { connection });
                    }
                }
            }
        }
        out
    }

    /// Restore exactly the fields the forward update touched, to their
    /// captured values.
    fn inverse_update(&self, id: EntityId, patch: &EntityPatch) -> Option<OperationKind> {
        let before = self.captured.get(&id)?.as_ref()?;
        match (patch, before) {
            (EntityPatch::Node(patch), Entity::Node(before)) => {
                let inverse = NodePatch {
                    position: patch.position.map(|_| before.position),
                    size: patch.size.map(|_| before.size),
                    z_index: patch.z_index.map(|_| before.z_index),
                    content: patch.content.as_ref().map(|_| before.content.clone()),
                };
                (!inverse.is_empty()).then(|| OperationKind::Update {
                    id,
                    patch: EntityPatch::Node(inverse),
                })
            }
            (EntityPatch::Connection(patch), Entity::Connection(before)) => {
                let inverse = ConnectionPatch {
                    source_anchor: patch.source_anchor.map(|_| before.source_anchor),
                    target_anchor: patch.target_anchor.map(|_| before.target_anchor),
                    style: patch.style.as_ref().map(|_| before.style.clone()),
                };
                (!inverse.is_empty()).then(|| OperationKind::Update {
                    id,
                    patch: EntityPatch::Connection(inverse),
                })
            }
            _ => None,
        }
    }
}

/// Result of an undo/redo request.
#[derive(Debug)]
pub enum HistoryOutcome {
    /// Operations were applied; ship them to peers like any local edit.
    Applied {
        ops: Vec<Operation>,
        effects: Vec<AppliedEffect>,
    },
    /// Stack was empty, or every operation no-oped because the entities
    /// were deleted by other participants. Surfaced to the user as a
    /// "nothing to undo" signal — resurrection requires a fresh create.
    NothingToDo,
}

/// Bounded undo/redo stack for one participant.
#[derive(Debug)]
pub struct HistoryManager {
    undo: VecDeque<Transaction>,
    redo: Vec<Transaction>,
    depth: usize,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        HistoryManager {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Push a committed transaction. Clears the redo stack and evicts
    /// the oldest entry past the depth bound.
    pub fn record(&mut self, transaction: Transaction) {
        if transaction.is_empty() {
            return;
        }
        self.redo.clear();
        self.undo.push_back(transaction);
        while self.undo.len() > self.depth {
            self.undo.pop_front();
        }
    }

    /// Undo the most recent transaction.
    pub fn undo(
        &mut self,
        store: &mut GraphStore,
        clock: &mut LogicalClock,
        user: Option<&CurrentUser>,
    ) -> HistoryOutcome {
        let Some(transaction) = self.undo.pop_back() else {
            return HistoryOutcome::NothingToDo;
        };
        let kinds = transaction.inverse_kinds();
        let outcome = Self::apply_stamped(kinds, store, clock, user, transaction.label());
        self.redo.push(transaction);
        outcome
    }

    /// Re-apply the most recently undone transaction.
    pub fn redo(
        &mut self,
        store: &mut GraphStore,
        clock: &mut LogicalClock,
        user: Option<&CurrentUser>,
    ) -> HistoryOutcome {
        let Some(transaction) = self.redo.pop() else {
            return HistoryOutcome::NothingToDo;
        };
        let kinds: Vec<OperationKind> =
            transaction.ops.iter().map(|op| op.kind.clone()).collect();
        let outcome = Self::apply_stamped(kinds, store, clock, user, transaction.label());
        self.undo.push_back(transaction);
        outcome
    }

    /// Stamp each kind freshly (so it wins last-writer-wins now) and
    /// apply it. Rejections and no-ops skip that operation only.
    fn apply_stamped(
        kinds: Vec<OperationKind>,
        store: &mut GraphStore,
        clock: &mut LogicalClock,
        user: Option<&CurrentUser>,
        label: &str,
    ) -> HistoryOutcome {
        let mut ops = Vec::new();
        let mut effects = Vec::new();
        for kind in kinds {
            let op = Operation::new(clock.tick(), kind);
            match store.apply(&op, user) {
                Ok(effect) if !effect.is_noop() => {
                    ops.push(op);
                    effects.push(effect);
                }
                Ok(_) => {}
                Err(rejection) => {
                    tracing::debug!(%rejection, transaction = label, "history op skipped");
                }
            }
        }
        if ops.is_empty() {
            HistoryOutcome::NothingToDo
        } else {
            HistoryOutcome::Applied { ops, effects }
        }
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}
