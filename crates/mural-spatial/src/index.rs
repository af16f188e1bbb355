//! Store-facing wrapper around the quadtree
//!
//! Consumes the bounding-box deltas the graph store returns from
//! `apply()`, so the index never observes state the store has not
//! committed. Strictly derived data: any suspected inconsistency is
//! resolved by rebuilding from the store, which is always safe.

use mural_core::{AppliedEffect, BBoxDelta, EntityId, GraphStore, Point, Rect};

use crate::quadtree::QuadTree;

/// Region of the plane the index subdivides. Entities outside it are
/// still indexed, just without subdivision benefits.
pub const DEFAULT_WORLD_BOUNDS: Rect = Rect {
    x: -1_000_000.0,
    y: -1_000_000.0,
    w: 2_000_000.0,
    h: 2_000_000.0,
};

pub struct SpatialIndex {
    tree: QuadTree,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_WORLD_BOUNDS)
    }

    pub fn with_bounds(bounds: Rect) -> Self {
        SpatialIndex {
            tree: QuadTree::new(bounds),
        }
    }

    /// Build an index over everything currently in the store.
    pub fn from_store(store: &GraphStore) -> Self {
        let mut index = Self::new();
        index.rebuild_from(store);
        index
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Absorb one applied operation's bounding-box changes.
    pub fn apply_effect(&mut self, effect: &AppliedEffect) {
        for delta in &effect.deltas {
            self.apply_delta(delta);
        }
    }

    pub fn apply_delta(&mut self, delta: &BBoxDelta) {
        match delta {
            BBoxDelta::Insert { id, bbox } => self.tree.insert(*id, *bbox),
            BBoxDelta::Update { id, bbox } => self.tree.update(*id, *bbox),
            BBoxDelta::Remove { id } => self.tree.remove(*id),
        }
    }

    /// Entity ids intersecting `rect`. One call per render frame, plus
    /// hit-testing on pointer-down.
    pub fn query(&self, rect: Rect) -> Vec<EntityId> {
        self.tree.query(rect)
    }

    /// Query with visited-cell count, for instrumentation and the
    /// sub-linearity tests.
    pub fn query_counting(&self, rect: Rect) -> (Vec<EntityId>, usize) {
        self.tree.query_counting(rect)
    }

    /// Smallest-area entity under the pointer.
    pub fn hit_test(&self, point: Point) -> Option<EntityId> {
        self.tree.hit_test(point)
    }

    /// Discard and re-derive everything from the store.
    pub fn rebuild_from(&mut self, store: &GraphStore) {
        self.tree = QuadTree::new(DEFAULT_WORLD_BOUNDS);
        for entity in store.query_all() {
            let id = entity.id();
            if let Some(bbox) = store.entity_bbox(id) {
                self.tree.insert(id, bbox);
            }
        }
    }

    /// Debug-build consistency check against the store. On mismatch the
    /// index is rebuilt; it holds no authoritative data, so this is
    /// always safe.
    pub fn ensure_consistent(&mut self, store: &GraphStore) {
        let consistent = self.matches(store);
        debug_assert!(consistent, "spatial index diverged from graph store");
        if !consistent {
            tracing::warn!("spatial index inconsistent with store, rebuilding");
            self.rebuild_from(store);
        }
    }

    fn matches(&self, store: &GraphStore) -> bool {
        let entities = store.query_all();
        if entities.len() != self.tree.len() {
            return false;
        }
        entities.iter().all(|entity| {
            let id = entity.id();
            match (self.tree.bbox_of(id), store.entity_bbox(id)) {
                (Some(indexed), Some(actual)) => indexed == actual,
                _ => false,
            }
        })
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
