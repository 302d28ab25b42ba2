//! Error type for exchange operations.

use std::path::PathBuf;

use layout::LayoutError;
use thiserror::Error;

use crate::comm::{CommError, Tag};

/// Errors raised while exchanging data between ranks.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid decomposition, topology or buffer access.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// The message passing backend failed.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for the expected schema.
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A received payload disagrees with the locally expected region size.
    ///
    /// Indicates a stale or mismatched topology on one side of the transfer.
    #[error("payload from rank {peer} with tag {tag} is {received} bytes, expected {expected}")]
    SizeMismatch {
        /// Sending rank.
        peer: usize,
        /// Message tag.
        tag: Tag,
        /// Bytes implied by the local receive region.
        expected: usize,
        /// Bytes received.
        received: usize,
    },

    /// Data handles that do not belong to this rank's current layout.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),
}

/// Result alias for exchange operations.
pub type Result<T> = std::result::Result<T, Error>;
