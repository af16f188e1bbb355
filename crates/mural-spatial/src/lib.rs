//! Mural Spatial — quadtree index and viewport controller

pub mod index;
pub mod quadtree;
pub mod viewport;


pub use index::{SpatialIndex, DEFAULT_WORLD_BOUNDS};
pub use quadtree::QuadTree;
pub use viewport::ViewportController;
