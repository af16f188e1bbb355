//! Mural Core — canvas data model, graph store, history, and guard

pub mod model;
pub mod op;
pub mod error;
pub mod guard;
pub mod store;
pub mod history;
pub mod engine;
pub mod persist;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use model::{
    ActorId, Connection, ConnectionStamps, ConnectionStyle, Entity, EntityId, GraphSnapshot,
    LogicalTimestamp, Node, NodeKind, NodeStamps, Point, Rect, Size, Viewport,
};
pub use op::{
    ConnectionPatch, EntityPatch, LogicalClock, NodePatch, Operation, OperationKind,
};
pub use error::{DenyReason, Rejection};
pub use guard::{is_owner_or_privileged, CurrentUser, Role};
pub use store::{AppliedEffect, BBoxDelta, GraphStore};
pub use history::{HistoryManager, HistoryOutcome, Transaction};
pub use engine::{AlignMode, CanvasEngine, DispatchOutcome, DistributeAxis, UserIntent};
pub use persist::{clear_store, FileStore, MemoryStore, Persistence};
