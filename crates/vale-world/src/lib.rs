//! World-space state: the per-map entity index and proximity-triggered
//! warp transitions.

pub mod area;
pub mod warp;

pub use area::{Area, AreaIndex, EntityKind, WorldEntity};
pub use warp::{WarpRegistry, WarpTarget, WarpTemplate};
