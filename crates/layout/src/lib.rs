//! Domain Layout
//!
//! This crate holds the communication-free half of the decomposition
//! machinery. Everything here is rank-local and deterministic, so every rank
//! that feeds in the same inputs derives the same tables.
//!
//! # Modules
//! - [`index`] -- Inclusive D-dimensional index boxes (`NdIndex`).
//! - [`direction`] -- The 3^D - 1 neighbor directions and their opposite-direction matching.
//! - [`mesh`] -- Uniform Cartesian mesh mapping positions to cells, with periodic wrap.
//! - [`decomposition`] -- Recursive-bisection policy and the `SubdomainTable`.
//! - [`topology`] -- Per-rank send/receive regions for every direction (`NeighborTopology`).
//! - [`field`] -- Ghost-padded field storage with pack/unpack of sub-boxes.
//! - [`particle`] -- Struct-of-arrays particle storage with a fixed attribute schema.

#![warn(missing_docs)]

pub mod decomposition;
pub mod direction;
pub mod error;
pub mod field;
pub mod index;
pub mod mesh;
pub mod particle;
pub mod topology;

pub use decomposition::{bisect, DimTag, SubdomainTable, WorkEstimate};
pub use direction::{Category, Direction, DirectionTable};
pub use error::{LayoutError, Result};
pub use field::{Field, UnpackOp};
pub use index::NdIndex;
pub use mesh::Mesh;
pub use particle::{Attribute, ParticleArrays};
pub use topology::{HaloLink, NeighborTopology};

/// Largest dimensionality the direction classification (face/edge/vertex) covers.
pub const MAX_DIM: usize = 3;

/// Reject dimensionalities outside `1..=MAX_DIM`.
pub(crate) fn check_dim<const D: usize>() -> Result<()> {
    if D == 0 || D > MAX_DIM {
        return Err(LayoutError::UnsupportedDimension(D));
    }
    Ok(())
}
