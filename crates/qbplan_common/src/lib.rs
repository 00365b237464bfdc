//! Shared foundational types used across the qbplan floorplanner.
//!
//! This crate provides the opaque identifiers for modules, nets, and quad
//! cells, the integer rectangle used by every geometric computation, and the
//! content hash used to fingerprint placements.

#![warn(missing_docs)]

pub mod geom;
pub mod hash;
pub mod ids;

pub use geom::Rect;
pub use hash::ContentHash;
pub use ids::{CellId, ModuleId, NetId};
