//! MPI communicator.
//!
//! Requires the `mpi` feature flag and an MPI installation. The caller
//! initializes MPI and keeps the universe alive for the lifetime of the
//! communicator:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new(universe.world());
//! ```

use ::mpi::collective::SystemOperation;
use ::mpi::request::{scope, WaitGuard};
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::*;

use super::{CommError, Communicator, Envelope, Message};

/// MPI-backed communicator over a world or split communicator.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap an initialized communicator.
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer == self.rank() || peer >= self.size() {
            return Err(CommError::InvalidPeer {
                peer,
                size: self.size(),
            });
        }
        Ok(())
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn exchange(&self, sends: &[Message<'_>], recvs: &[Envelope]) -> Result<Vec<Vec<u8>>, CommError> {
        for peer in sends.iter().map(|m| m.dest).chain(recvs.iter().map(|e| e.source)) {
            self.check_peer(peer)?;
        }
        let world = &self.world;
        let received = scope(|scope| {
            // Sends stay in flight until every receive below has completed
            let pending: Vec<_> = sends
                .iter()
                .map(|m| {
                    WaitGuard::from(
                        world
                            .process_at_rank(m.dest as i32)
                            .immediate_send_with_tag(scope, m.payload, m.tag),
                    )
                })
                .collect();
            let data: Vec<Vec<u8>> = recvs
                .iter()
                .map(|e| {
                    let (payload, _status) = world
                        .process_at_rank(e.source as i32)
                        .receive_vec_with_tag::<u8>(e.tag);
                    payload
                })
                .collect();
            drop(pending);
            data
        });
        Ok(received)
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        let mut global = 0.0f64;
        self.world
            .all_reduce_into(&local, &mut global, SystemOperation::sum());
        Ok(global)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, CommError> {
        let mut global = 0.0f64;
        self.world
            .all_reduce_into(&local, &mut global, SystemOperation::max());
        Ok(global)
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<(), CommError> {
        let send = local.to_vec();
        self.world
            .all_reduce_into(&send[..], local, SystemOperation::sum());
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }
}
