//! Lock/authorization guard
//!
//! One predicate, evaluated twice: optimistically on the originating
//! client (so a drag on a locked node aborts at gesture start instead of
//! round-tripping a rejection), and authoritatively at the relay against
//! current server state. The second check is the one that matters for
//! correctness; both run this same code.

use serde::{Deserialize, Serialize};

use crate::error::{DenyReason, Rejection};
use crate::model::{ActorId, Entity, EntityId};
use crate::op::OperationKind;

/// Role supplied by the authentication collaborator. Opaque to the
/// canvas beyond the distinctions below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

/// The authenticated participant, as handed to us from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: ActorId,
    pub role: Role,
}

impl CurrentUser {
    pub fn new(id: ActorId, role: Role) -> Self {
        CurrentUser { id, role }
    }
}

/// Ownership rule beyond the plain lock flag: admins and the entity's
/// creator are privileged.
pub fn is_owner_or_privileged(user: &CurrentUser, entity: &Entity) -> bool {
    user.role == Role::Admin || entity.created_by() == user.id
}

/// Decide whether `kind` may proceed against `entity`.
///
/// `entity` is `None` only for creates (nothing exists yet). `user` is
/// `None` on the remote-merge path: those operations already passed
/// the authoritative check at the relay, and re-checking lock state
/// against a replica's possibly different local view would make the
/// merge outcome depend on delivery order. Lock and role enforcement
/// therefore run only where a user identity is present.
pub fn check(
    kind: &OperationKind,
    entity: Option<&Entity>,
    user: Option<&CurrentUser>,
) -> Result<(), Rejection> {
    if let Some(user) = user {
        if user.role == Role::Viewer {
            let id = kind
                .primary_target()
                .or_else(|| entity.map(|e| e.id()))
                .unwrap_or(EntityId(uuid::Uuid::nil()));
            return Err(Rejection::Forbidden {
                entity: id,
                reason: DenyReason::ReadOnlyRole,
            });
        }
    }

    match kind {
        // Creation is never denied by lock state.
        OperationKind::CreateNode { .. } | OperationKind::CreateConnection { .. } => Ok(()),

        // Unlocking is the escape hatch: always allowed. Locking an
        // entity someone else created requires ownership or admin.
        OperationKind::LockToggle { locked, id } => {
            if !locked {
                return Ok(());
            }
            if let (Some(user), Some(entity)) = (user, entity) {
                if !is_owner_or_privileged(user, entity) {
                    return Err(Rejection::Forbidden {
                        entity: *id,
                        reason: DenyReason::NotOwner,
                    });
                }
            }
            Ok(())
        }

        OperationKind::Update { id, .. } | OperationKind::Move { id, .. } => {
            if user.is_some() && entity.map(Entity::locked).unwrap_or(false) {
                Err(Rejection::Forbidden {
                    entity: *id,
                    reason: DenyReason::Locked,
                })
            } else {
                Ok(())
            }
        }

        OperationKind::Delete { .. } => match (user, entity) {
            (Some(_), Some(e)) if e.locked() => Err(Rejection::Forbidden {
                entity: e.id(),
                reason: DenyReason::Locked,
            }),
            _ => Ok(()),
        },
    }
}
