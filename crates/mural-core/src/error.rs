//! Typed rejection/error values for canvas operations

use thiserror::Error;

use crate::model::EntityId;

/// Why the store (or guard) refused an operation.
///
/// Rejections are ordinary return values, never panics; every rejection
/// path leaves the store exactly as it was before the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The operation references an entity absent from the store and not
    /// tombstoned — stale client state or out-of-order delivery.
    #[error("entity {0} not found")]
    NotFound(EntityId),

    /// The guard denied the operation.
    #[error("operation on {entity} forbidden: {reason}")]
    Forbidden { entity: EntityId, reason: DenyReason },

    /// A connection create referenced a missing endpoint.
    #[error("connection endpoint {0} not found")]
    MissingEndpoint(EntityId),
}

/// Machine-readable denial cause, surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Entity is locked and the operation is not an unlock.
    Locked,
    /// The user's role does not permit mutation.
    ReadOnlyRole,
    /// Lock changes on entities created by others require ownership or
    /// admin privileges.
    NotOwner,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Locked => write!(f, "entity is locked"),
            DenyReason::ReadOnlyRole => write!(f, "role is read-only"),
            DenyReason::NotOwner => write!(f, "not owner or privileged"),
        }
    }
}
