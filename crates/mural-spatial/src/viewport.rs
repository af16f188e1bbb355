//! Per-user viewport: pan/zoom tracking and frame visibility
//!
//! Viewports are private to each participant — persisted per user,
//! never merged or broadcast as durable state.

use std::time::{Duration, Instant};

use mural_core::{ActorId, EntityId, Persistence, Point, Rect, Size, Viewport};

use crate::index::SpatialIndex;

const MIN_ZOOM: f64 = 0.05;
const MAX_ZOOM: f64 = 32.0;
/// Minimum quiet period between viewport saves.
const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Tracks one user's pan/zoom and derives the per-frame visible set.
pub struct ViewportController {
    viewport: Viewport,
    /// Screen size in device-independent pixels.
    screen: Size,
    dirty: bool,
    last_saved: Instant,
}

impl ViewportController {
    pub fn new(user: ActorId, screen: Size) -> Self {
        ViewportController {
            viewport: Viewport::new(user),
            screen,
            dirty: false,
            last_saved: Instant::now(),
        }
    }

    /// Restore a previously saved viewport, falling back to defaults.
    pub fn restore(
        user: ActorId,
        screen: Size,
        persistence: &dyn Persistence,
        workspace: &str,
    ) -> Self {
        let mut controller = Self::new(user, screen);
        match persistence.load_viewport(user, workspace) {
            Ok(Some(viewport)) => controller.viewport = viewport,
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, "failed to load viewport, using defaults");
            }
        }
        controller
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn zoom(&self) -> f64 {
        self.viewport.zoom
    }

    pub fn pan(&self) -> Point {
        self.viewport.pan
    }

    pub fn set_screen(&mut self, screen: Size) {
        self.screen = screen;
    }

    /// Pan by a screen-space delta.
    pub fn set_pan(&mut self, dx: f64, dy: f64) {
        self.viewport.pan.x += dx / self.viewport.zoom;
        self.viewport.pan.y += dy / self.viewport.zoom;
        self.dirty = true;
    }

    /// Zoom by `factor`, anchored so the world point under `anchor`
    /// (screen coordinates — cursor or pinch centroid) stays put.
    pub fn set_zoom(&mut self, factor: f64, anchor: Point) {
        let old_zoom = self.viewport.zoom;
        let new_zoom = (old_zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        if new_zoom == old_zoom {
            return;
        }
        let world_x = self.viewport.pan.x + anchor.x / old_zoom;
        let world_y = self.viewport.pan.y + anchor.y / old_zoom;
        self.viewport.pan.x = world_x - anchor.x / new_zoom;
        self.viewport.pan.y = world_y - anchor.y / new_zoom;
        self.viewport.zoom = new_zoom;
        self.dirty = true;
    }

    /// The currently visible region in world space.
    pub fn visible_rect(&self) -> Rect {
        Rect::new(
            self.viewport.pan.x,
            self.viewport.pan.y,
            self.screen.w / self.viewport.zoom,
            self.screen.h / self.viewport.zoom,
        )
    }

    /// Entity ids to hand the renderer this frame.
    pub fn visible_set(&self, index: &SpatialIndex) -> Vec<EntityId> {
        index.query(self.visible_rect())
    }

    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new(
            self.viewport.pan.x + p.x / self.viewport.zoom,
            self.viewport.pan.y + p.y / self.viewport.zoom,
        )
    }

    /// Debounced save. Call freely (e.g. once per frame); writes only
    /// when the viewport changed and the quiet period elapsed.
    pub fn maybe_save(&mut self, persistence: &dyn Persistence, workspace: &str) {
        if !self.dirty || self.last_saved.elapsed() < SAVE_DEBOUNCE {
            return;
        }
        self.flush(persistence, workspace);
    }

    /// Unconditional save, for session teardown.
    pub fn flush(&mut self, persistence: &dyn Persistence, workspace: &str) {
        if !self.dirty {
            return;
        }
        if let Err(error) =
            persistence.save_viewport(self.viewport.user, workspace, &self.viewport)
        {
            tracing::warn!(%error, "failed to save viewport");
            return;
        }
        self.dirty = false;
        self.last_saved = Instant::now();
    }
}
