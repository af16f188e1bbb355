//! Client-side synchronization session
//!
//! Glues the canvas engine, the spatial index, peer presence, and the
//! wire protocol together. Local edits apply optimistically and queue
//! in an outbox; remote operations flow through the engine so the
//! Lamport clock observes every stamp. Operations referencing entities
//! that have not arrived yet are parked and retried, since frames from
//! different peers may interleave in any order.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use mural_core::{
    AppliedEffect, CanvasEngine, CurrentUser, DispatchOutcome, EntityId, GraphSnapshot, Operation,
    OperationKind, Point, Rejection, UserIntent,
};
use mural_spatial::SpatialIndex;

use crate::presence::PresenceMap;
use crate::protocol::{ClientMessage, PresenceState, ServerMessage};

/// Retries before a parked operation is dropped as unresolvable.
const MAX_ORPHAN_RETRIES: u8 = 5;
/// Tombstones older than this are eligible for collection.
const TOMBSTONE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct ParkedOp {
    op: Operation,
    retries: u8,
}

/// What a remote frame did, for the caller to react to (redraw,
/// presence overlay refresh, snapshot handling).
#[derive(Debug)]
pub enum SessionEvent {
    /// Entities changed; the ids are in the effects' deltas.
    Applied(AppliedEffect),
    PresenceChanged,
    PeerLeft(mural_core::ActorId),
    SnapshotRestored,
    /// The server refused one of our operations.
    Rejected(String),
    Nothing,
}

/// One participant's live connection to a shared canvas.
pub struct SyncSession {
    engine: CanvasEngine,
    index: SpatialIndex,
    presence: PresenceMap,
    presence_seq: u64,
    outbox: VecDeque<Operation>,
    parked: Vec<ParkedOp>,
    connected: bool,
}

impl SyncSession {
    pub fn new(user: CurrentUser) -> Self {
        SyncSession {
            engine: CanvasEngine::new(user),
            index: SpatialIndex::new(),
            presence: PresenceMap::new(),
            presence_seq: 0,
            outbox: VecDeque::new(),
            parked: Vec::new(),
            connected: false,
        }
    }

    pub fn engine(&self) -> &CanvasEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CanvasEngine {
        &mut self.engine
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn presence(&self) -> &PresenceMap {
        &self.presence
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The opening frame for a fresh connection.
    pub fn hello(&self) -> ClientMessage {
        let user = self.engine.user();
        ClientMessage::Hello {
            actor: user.id,
            role: user.role,
        }
    }

    // ── Local edits ─────────────────────────────────────────

    /// Apply a user intent locally and queue the resulting operations
    /// for the relay. Works identically online and offline; the outbox
    /// simply drains later.
    pub fn dispatch(&mut self, intent: UserIntent) -> Result<DispatchOutcome, Rejection> {
        let outcome = self.engine.dispatch(intent)?;
        self.absorb_local(&outcome);
        Ok(outcome)
    }

    pub fn undo(&mut self) -> DispatchOutcome {
        let outcome = self.engine.undo();
        self.absorb_local(&outcome);
        outcome
    }

    pub fn redo(&mut self) -> DispatchOutcome {
        let outcome = self.engine.redo();
        self.absorb_local(&outcome);
        outcome
    }

    fn absorb_local(&mut self, outcome: &DispatchOutcome) {
        for effect in &outcome.effects {
            self.index.apply_effect(effect);
        }
        self.outbox.extend(outcome.ops.iter().cloned());
    }

    /// Operations waiting to go out, drained into wire messages.
    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        self.outbox
            .drain(..)
            .map(|op| ClientMessage::Op { op })
            .collect()
    }

    pub fn pending_ops(&self) -> usize {
        self.outbox.len()
    }

    /// Build this user's next presence frame.
    pub fn local_presence(&mut self, cursor: Point, editing: Option<EntityId>) -> ClientMessage {
        self.presence_seq += 1;
        let mut selection: Vec<EntityId> = self.engine.selection().collect();
        selection.sort();
        ClientMessage::Presence {
            state: PresenceState {
                actor: self.engine.user().id,
                cursor,
                selection,
                editing,
                seq: self.presence_seq,
            },
        }
    }

    // ── Remote frames ───────────────────────────────────────

    /// Handle one frame from the relay.
    pub fn handle_server_message(&mut self, msg: ServerMessage) -> SessionEvent {
        match msg {
            ServerMessage::Welcome { snapshot } => {
                self.connected = true;
                self.restore_snapshot(snapshot);
                SessionEvent::SnapshotRestored
            }
            ServerMessage::Snapshot { snapshot } => {
                self.restore_snapshot(snapshot);
                SessionEvent::SnapshotRestored
            }
            ServerMessage::Op { op } => self.apply_remote(&op),
            ServerMessage::Presence { state } => {
                if self.presence.update(state) {
                    SessionEvent::PresenceChanged
                } else {
                    SessionEvent::Nothing
                }
            }
            ServerMessage::PeerLeft { actor } => {
                self.presence.remove(actor);
                SessionEvent::PeerLeft(actor)
            }
            ServerMessage::Rejected { message } => {
                warn!(%message, "server rejected an operation");
                SessionEvent::Rejected(message)
            }
            ServerMessage::Error { message } => {
                warn!(%message, "server error");
                SessionEvent::Nothing
            }
            ServerMessage::Pong => SessionEvent::Nothing,
        }
    }

    /// Apply a peer operation. Commutative and idempotent: replays and
    /// reorderings converge, operations arriving ahead of the entities
    /// they reference get parked.
    pub fn apply_remote(&mut self, op: &Operation) -> SessionEvent {
        match self.engine.apply_remote(op) {
            Ok(effect) => {
                self.index.apply_effect(&effect);
                self.retry_parked();
                SessionEvent::Applied(effect)
            }
            Err(rejection @ (Rejection::NotFound(_) | Rejection::MissingEndpoint(_))) => {
                debug!(%rejection, "parking out-of-order operation until its target arrives");
                self.parked.push(ParkedOp {
                    op: op.clone(),
                    retries: 0,
                });
                SessionEvent::Nothing
            }
            Err(error) => {
                // Remote ops that fail any other way are stale or
                // no-ops; the sender's replica already resolved them.
                debug!(%error, "remote operation not applied");
                SessionEvent::Nothing
            }
        }
    }

    /// Each successfully applied operation may have delivered a missing
    /// entity, so give every parked op another chance.
    fn retry_parked(&mut self) {
        let mut pending = std::mem::take(&mut self.parked);
        let mut progressed = true;
        while progressed {
            progressed = false;
            let mut still_parked = Vec::new();
            for mut parked in pending {
                match self.engine.apply_remote(&parked.op) {
                    Ok(effect) => {
                        self.index.apply_effect(&effect);
                        progressed = true;
                    }
                    Err(Rejection::NotFound(_) | Rejection::MissingEndpoint(_)) => {
                        parked.retries += 1;
                        if parked.retries >= MAX_ORPHAN_RETRIES {
                            warn!(
                                stamp = ?parked.op.stamp,
                                "dropping orphan operation, its target never arrived"
                            );
                        } else {
                            still_parked.push(parked);
                        }
                    }
                    Err(error) => {
                        debug!(%error, "parked operation no longer applicable");
                    }
                }
            }
            pending = still_parked;
        }
        self.parked = pending;
    }

    pub fn parked_ops(&self) -> usize {
        self.parked.len()
    }

    // ── Connection lifecycle ────────────────────────────────

    /// The transport dropped. Edits keep applying locally and queue in
    /// the outbox; peer presence is stale the moment we can't hear them.
    pub fn connection_lost(&mut self) {
        self.connected = false;
        self.presence.clear();
    }

    /// The transport is back. Returns the frames to send: a hello plus a
    /// snapshot request; the outbox drains after the snapshot lands.
    pub fn reconnected(&mut self) -> Vec<ClientMessage> {
        self.connected = true;
        vec![self.hello(), ClientMessage::RequestSnapshot]
    }

    /// Replace local state with an authoritative snapshot, then replay
    /// the outbox on top with fresh stamps so offline edits win their
    /// last-writer races and reach peers.
    fn restore_snapshot(&mut self, snapshot: GraphSnapshot) {
        let pending: Vec<OperationKind> =
            self.outbox.drain(..).map(|op| op.kind).collect();
        self.parked.clear();
        self.engine.restore(snapshot);
        for kind in pending {
            match self.engine.reapply(kind) {
                Ok((op, _)) => self.outbox.push_back(op),
                Err(error) => {
                    debug!(%error, "queued edit no longer applies after snapshot");
                }
            }
        }
        self.index.rebuild_from(self.engine.store());
    }

    /// Periodic housekeeping; call on a timer, not per frame.
    pub fn maintain(&mut self) {
        let collected = self.engine.store_mut().collect_tombstones(TOMBSTONE_TTL);
        if collected > 0 {
            debug!(collected, "collected expired tombstones");
        }
    }
}
