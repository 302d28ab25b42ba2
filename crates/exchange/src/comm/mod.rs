//! Message passing abstraction.
//!
//! Every component receives an explicit [`Communicator`] handle. The trait
//! carries exactly what the exchange protocols need: a post-all-then-wait
//! point-to-point exchange, scalar and element-wise all-reduce, and a
//! barrier.
//!
//! Implementations: [`SingleProcess`] (one rank, no peers), [`LocalComm`]
//! (one rank per thread over channels) and `MpiComm` (behind the `mpi`
//! feature).

use thiserror::Error;

mod local;
#[cfg(feature = "mpi")]
mod mpi_backend;

pub use local::LocalComm;
#[cfg(feature = "mpi")]
pub use mpi_backend::MpiComm;

/// Message tag.
pub type Tag = i32;

/// Tag bases per protocol. Link tags are added to the base and stay below 4096.
pub mod tags {
    use super::Tag;

    /// Ghost fill.
    pub const FILL: Tag = 1 << 12;
    /// Ghost accumulate.
    pub const ACCUMULATE: Tag = 2 << 12;
    /// Particle departure counts.
    pub const PARTICLE_COUNT: Tag = 3 << 12;
    /// Packed particle records.
    pub const PARTICLE_DATA: Tag = 4 << 12;
    /// Field migration after repartition.
    pub const REPARTITION: Tag = 5 << 12;
    /// Collectives on backends without native ones.
    pub const COLLECTIVE: Tag = 6 << 12;
}

/// An outgoing point-to-point message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// Destination rank
    pub dest: usize,
    /// Tag
    pub tag: Tag,
    /// Raw bytes
    pub payload: &'a [u8],
}

/// An expected incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Source rank
    pub source: usize,
    /// Tag
    pub tag: Tag,
}

/// Failures of the message passing layer.
#[derive(Debug, Error)]
pub enum CommError {
    /// A message addressed to the local rank or to a rank that does not exist.
    #[error("rank {peer} is not a remote peer in a communicator of size {size}")]
    InvalidPeer {
        /// Offending rank.
        peer: usize,
        /// Communicator size.
        size: usize,
    },

    /// A peer went away before the exchange completed.
    #[error("rank {0} disconnected")]
    Disconnected(usize),

    /// Peers contributed vectors of different lengths to a collective.
    #[error("collective contribution from rank {peer} has {got} bytes, expected {expected}")]
    CollectiveShape {
        /// Contributing rank.
        peer: usize,
        /// Local contribution size.
        expected: usize,
        /// Peer contribution size.
        got: usize,
    },
}

/// Explicit process-group handle.
pub trait Communicator {
    /// This rank.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Post every send without waiting, then block until every listed
    /// receive has arrived.
    ///
    /// Payloads are returned in the order of `recvs`. Messages between a
    /// pair of ranks with the same tag do not overtake each other. Neither
    /// list may address the local rank.
    fn exchange(&self, sends: &[Message<'_>], recvs: &[Envelope]) -> Result<Vec<Vec<u8>>, CommError>;

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError>;

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> Result<f64, CommError>;

    /// Element-wise sum of a vector across all ranks, in place.
    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<(), CommError>;

    /// Synchronization barrier.
    fn barrier(&self) -> Result<(), CommError>;
}

/// Communicator for a single rank. Every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, sends: &[Message<'_>], recvs: &[Envelope]) -> Result<Vec<Vec<u8>>, CommError> {
        let peer = sends
            .iter()
            .map(|m| m.dest)
            .chain(recvs.iter().map(|e| e.source))
            .next();
        match peer {
            Some(peer) => Err(CommError::InvalidPeer { peer, size: 1 }),
            None => Ok(Vec::new()),
        }
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        Ok(local)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, CommError> {
        Ok(local)
    }

    fn all_reduce_sum_vec(&self, _local: &mut [f64]) -> Result<(), CommError> {
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        Ok(())
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn exchange(&self, sends: &[Message<'_>], recvs: &[Envelope]) -> Result<Vec<Vec<u8>>, CommError> {
        (**self).exchange(sends, recvs)
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        (**self).all_reduce_sum(local)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, CommError> {
        (**self).all_reduce_max(local)
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<(), CommError> {
        (**self).all_reduce_sum_vec(local)
    }

    fn barrier(&self) -> Result<(), CommError> {
        (**self).barrier()
    }
}
