//! Peer presence tracking

use std::collections::HashMap;

use mural_core::ActorId;

use crate::protocol::PresenceState;

/// Latest known presence per peer. Updates are whole-state overwrites
/// guarded by the sender's sequence number, so stale frames arriving
/// late never win.
#[derive(Debug, Default)]
pub struct PresenceMap {
    peers: HashMap<ActorId, PresenceState>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a peer update. Returns false when the frame was stale.
    pub fn update(&mut self, state: PresenceState) -> bool {
        match self.peers.get(&state.actor) {
            Some(current) if current.seq >= state.seq => false,
            _ => {
                self.peers.insert(state.actor, state);
                true
            }
        }
    }

    pub fn remove(&mut self, actor: ActorId) -> Option<PresenceState> {
        self.peers.remove(&actor)
    }

    pub fn get(&self, actor: ActorId) -> Option<&PresenceState> {
        self.peers.get(&actor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceState> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
