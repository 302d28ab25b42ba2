//! Error type for layout construction and buffer handling.

use thiserror::Error;

/// Errors raised while building decompositions or moving data through views.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    /// Only 1, 2 and 3 dimensional layouts are supported.
    #[error("unsupported dimensionality {0} (supported: 1 to 3)")]
    UnsupportedDimension(usize),

    /// A decomposition was requested for zero ranks.
    #[error("process count must be at least 1")]
    NoRanks,

    /// More ranks than cells along the parallel dimensions.
    #[error("cannot assign {ranks} ranks to {cells} cells along the parallel dimensions")]
    TooManyRanks {
        /// Requested process count.
        ranks: usize,
        /// Product of the parallel extents.
        cells: usize,
    },

    /// Subdomain boxes overlap, leave gaps, or leave the global box.
    #[error("subdomains do not partition the global domain: {0}")]
    InvalidPartition(String),

    /// Ghost layer wider than the periodic extent it would wrap around.
    #[error("ghost width {ghost} exceeds periodic extent {extent} along dimension {dim}")]
    GhostTooWide {
        /// Requested ghost width.
        ghost: usize,
        /// Global extent along `dim`.
        extent: usize,
        /// Offending dimension.
        dim: usize,
    },

    /// An index outside the addressable region of a view.
    #[error("index {index:?} lies outside {region}")]
    OutOfRange {
        /// Offending global index.
        index: Vec<i64>,
        /// Display form of the region that was addressed.
        region: String,
    },

    /// A transfer buffer whose length disagrees with the region it targets.
    #[error("transfer size mismatch: expected {expected} bytes, got {received}")]
    SizeMismatch {
        /// Bytes implied by the target region.
        expected: usize,
        /// Bytes actually supplied.
        received: usize,
    },

    /// Particle record with the wrong number of attribute values.
    #[error("particle record has {got} attribute values, schema expects {expected}")]
    RecordWidth {
        /// Values required by the attribute schema.
        expected: usize,
        /// Values supplied.
        got: usize,
    },

    /// Attribute lookup by an unknown name.
    #[error("unknown particle attribute '{0}'")]
    UnknownAttribute(String),

    /// Non-positive or non-finite mesh spacing.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// Work estimate whose shape does not match its domain.
    #[error("work estimate holds {got} weights, domain has {expected} cells")]
    WorkShape {
        /// Cells in the domain.
        expected: usize,
        /// Weights supplied.
        got: usize,
    },
}

/// Result alias for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;
