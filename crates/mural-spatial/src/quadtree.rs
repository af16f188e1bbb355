//! Quadtree over entity bounding boxes
//!
//! Cells and entries live in flat arenas and reference each other by
//! index, never by pointer, so removals cannot dangle. The tree is a
//! pure cache: it can always be discarded and rebuilt from the store.

use std::collections::HashMap;

use mural_core::{EntityId, Point, Rect};

/// Entries a cell holds before it subdivides.
const MAX_ENTRIES_PER_CELL: usize = 8;
/// Maximum subdivision depth.
const MAX_DEPTH: u32 = 8;
/// Removed-entry fraction that triggers a full rebuild.
const STALE_REBUILD_RATIO: f64 = 0.25;

/// One quadrant cell, in the cell arena.
struct Cell {
    bounds: Rect,
    depth: u32,
    /// Handles into the entry slab.
    entries: Vec<usize>,
    /// Indices of the four child cells, once subdivided.
    children: Option<[usize; 4]>,
}

impl Cell {
    fn new(bounds: Rect, depth: u32) -> Self {
        Cell {
            bounds,
            depth,
            entries: Vec::new(),
            children: None,
        }
    }
}

/// One indexed entity, in the entry slab.
struct Entry {
    id: EntityId,
    bbox: Rect,
    cell: usize,
}

/// Spatial index answering "what intersects rectangle R" in better than
/// O(n) for canvases past a few thousand entities.
pub struct QuadTree {
    bounds: Rect,
    cells: Vec<Cell>,
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    by_id: HashMap<EntityId, usize>,
    /// Removals since the last rebuild, for the stale-ratio policy.
    removals: usize,
}

impl QuadTree {
    pub fn new(bounds: Rect) -> Self {
        QuadTree {
            bounds,
            cells: vec![Cell::new(bounds, 0)],
            entries: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            removals: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn bbox_of(&self, id: EntityId) -> Option<Rect> {
        let handle = *self.by_id.get(&id)?;
        self.entries[handle].as_ref().map(|e| e.bbox)
    }

    /// Insert an entity, replacing any previous box it had.
    pub fn insert(&mut self, id: EntityId, bbox: Rect) {
        if self.by_id.contains_key(&id) {
            self.update(id, bbox);
            return;
        }
        let handle = match self.free.pop() {
            Some(handle) => {
                self.entries[handle] = Some(Entry { id, bbox, cell: 0 });
                handle
            }
            None => {
                self.entries.push(Some(Entry { id, bbox, cell: 0 }));
                self.entries.len() - 1
            }
        };
        self.by_id.insert(id, handle);
        self.place(handle, 0);
    }

    /// Remove an entity. No-op if it was never indexed.
    pub fn remove(&mut self, id: EntityId) {
        let Some(handle) = self.by_id.remove(&id) else {
            return;
        };
        if let Some(entry) = self.entries[handle].take() {
            let cell = &mut self.cells[entry.cell];
            cell.entries.retain(|&h| h != handle);
        }
        self.free.push(handle);
        self.removals += 1;
        self.maybe_rebuild();
    }

    /// Move an entity to a new box. Stays in place when the box still
    /// fits the same leaf cell; otherwise remove+insert.
    pub fn update(&mut self, id: EntityId, bbox: Rect) {
        let Some(&handle) = self.by_id.get(&id) else {
            self.insert(id, bbox);
            return;
        };
        let stays = {
            let entry = self.entries[handle].as_ref().expect("live entry");
            let cell = &self.cells[entry.cell];
            cell.children.is_none() && cell.bounds.contains_rect(&bbox)
        };
        if stays {
            if let Some(entry) = self.entries[handle].as_mut() {
                entry.bbox = bbox;
            }
            return;
        }
        // Relocation, not churn: don't count toward the stale ratio.
        let cell = self.entries[handle].as_ref().expect("live entry").cell;
        self.cells[cell].entries.retain(|&h| h != handle);
        if let Some(entry) = self.entries[handle].as_mut() {
            entry.bbox = bbox;
        }
        self.place(handle, 0);
    }

    /// All entity ids whose box intersects `rect`.
    pub fn query(&self, rect: Rect) -> Vec<EntityId> {
        self.query_counting(rect).0
    }

    /// Query plus the number of cells visited, for instrumentation.
    pub fn query_counting(&self, rect: Rect) -> (Vec<EntityId>, usize) {
        let mut out = Vec::new();
        let mut visited = 0usize;
        let mut stack = vec![0usize];
        while let Some(cell_idx) = stack.pop() {
            visited += 1;
            let cell = &self.cells[cell_idx];
            for &handle in &cell.entries {
                if let Some(entry) = &self.entries[handle] {
                    if entry.bbox.intersects(&rect) {
                        out.push(entry.id);
                    }
                }
            }
            if let Some(children) = cell.children {
                for child in children {
                    if self.cells[child].bounds.intersects(&rect) {
                        stack.push(child);
                    }
                }
            }
        }
        (out, visited)
    }

    /// Smallest-area entity containing `point`, for pointer hit-testing.
    pub fn hit_test(&self, point: Point) -> Option<EntityId> {
        let mut best: Option<(f64, EntityId)> = None;
        let mut stack = vec![0usize];
        while let Some(cell_idx) = stack.pop() {
            let cell = &self.cells[cell_idx];
            for &handle in &cell.entries {
                if let Some(entry) = &self.entries[handle] {
                    if entry.bbox.contains_point(point) {
                        let area = entry.bbox.area();
                        if best.map(|(a, _)| area < a).unwrap_or(true) {
                            best = Some((area, entry.id));
                        }
                    }
                }
            }
            if let Some(children) = cell.children {
                for child in children {
                    if self.cells[child].bounds.contains_point(point) {
                        stack.push(child);
                    }
                }
            }
        }
        best.map(|(_, id)| id)
    }

    /// Throw the tree away and re-place every live entry.
    pub fn rebuild(&mut self) {
        let live: Vec<(EntityId, Rect)> = self
            .entries
            .iter()
            .flatten()
            .map(|e| (e.id, e.bbox))
            .collect();
        self.cells = vec![Cell::new(self.bounds, 0)];
        self.entries.clear();
        self.free.clear();
        self.by_id.clear();
        self.removals = 0;
        for (id, bbox) in live {
            self.insert(id, bbox);
        }
    }

    fn maybe_rebuild(&mut self) {
        let live = self.by_id.len();
        if live > 0 && self.removals as f64 > live as f64 * STALE_REBUILD_RATIO {
            tracing::trace!(removals = self.removals, live, "quadtree stale ratio hit, rebuilding");
            self.rebuild();
        }
    }

    /// Descend from `cell_idx` and attach the entry to the deepest cell
    /// that fully contains its box.
    fn place(&mut self, handle: usize, cell_idx: usize) {
        let bbox = self.entries[handle].as_ref().expect("live entry").bbox;
        let mut current = cell_idx;
        loop {
            let (depth, fits) = {
                let cell = &self.cells[current];
                (cell.depth, cell.bounds.contains_rect(&bbox))
            };
            // Out-of-bounds boxes live at the root; the canvas is
            // unbounded but the indexed region is not.
            if depth >= MAX_DEPTH || (current != 0 && !fits) {
                break;
            }
            if current == 0 && !fits {
                break;
            }
            if self.cells[current].children.is_none() {
                if self.cells[current].entries.len() < MAX_ENTRIES_PER_CELL {
                    break;
                }
                self.subdivide(current);
            }
            let Some(children) = self.cells[current].children else {
                break;
            };
            let mut moved = false;
            for child in children {
                if self.cells[child].bounds.contains_rect(&bbox) {
                    current = child;
                    moved = true;
                    break;
                }
            }
            if !moved {
                break;
            }
        }
        self.cells[current].entries.push(handle);
        if let Some(entry) = self.entries[handle].as_mut() {
            entry.cell = current;
        }
    }

    /// Split a leaf into four quadrants and sink entries that fit.
    fn subdivide(&mut self, cell_idx: usize) {
        let (bounds, depth) = {
            let cell = &self.cells[cell_idx];
            (cell.bounds, cell.depth)
        };
        let half_w = bounds.w / 2.0;
        let half_h = bounds.h / 2.0;
        let base = self.cells.len();
        self.cells.push(Cell::new(
            Rect::new(bounds.x, bounds.y, half_w, half_h),
            depth + 1,
        ));
        self.cells.push(Cell::new(
            Rect::new(bounds.x + half_w, bounds.y, half_w, half_h),
            depth + 1,
        ));
        self.cells.push(Cell::new(
            Rect::new(bounds.x, bounds.y + half_h, half_w, half_h),
            depth + 1,
        ));
        self.cells.push(Cell::new(
            Rect::new(bounds.x + half_w, bounds.y + half_h, half_w, half_h),
            depth + 1,
        ));
        let children = [base, base + 1, base + 2, base + 3];
        self.cells[cell_idx].children = Some(children);

        let handles = std::mem::take(&mut self.cells[cell_idx].entries);
        for handle in handles {
            let bbox = self.entries[handle].as_ref().expect("live entry").bbox;
            let mut sunk = false;
            for child in children {
                if self.cells[child].bounds.contains_rect(&bbox) {
                    self.cells[child].entries.push(handle);
                    if let Some(entry) = self.entries[handle].as_mut() {
                        entry.cell = child;
                    }
                    sunk = true;
                    break;
                }
            }
            if !sunk {
                self.cells[cell_idx].entries.push(handle);
            }
        }
    }
}
