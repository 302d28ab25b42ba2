//! Exchange Layer
//!
//! This crate moves data between ranks on top of the `layout` data model:
//! - Message passing abstraction with thread-backed and MPI backends
//! - Ghost-cell fill and accumulate (halo exchange)
//! - Particle redistribution with a count/data handshake
//! - Load-imbalance detection, repartition and field migration
//! - The `DistributedDomain` orchestrator tying the pieces together per rank

#![warn(missing_docs)]

pub mod balance;
pub mod buffer;
pub mod comm;
pub mod config;
pub mod distributed;
pub mod domain;
pub mod error;
pub mod halo;
pub mod repartition;
pub mod update;

pub use balance::{Imbalance, LoadBalancer};
pub use buffer::BufferPool;
pub use comm::{Communicator, LocalComm, SingleProcess};
pub use config::DecompositionConfig;
pub use distributed::run_ranks;
pub use domain::{DistributedDomain, RepartitionReport};
pub use error::{Error, Result};
pub use halo::HaloExchange;
pub use update::{ParticleUpdater, UpdateStats};

#[cfg(feature = "mpi")]
pub use comm::MpiComm;

/// Build a rank's domain from a configuration file.
///
/// Loads and validates the configuration, decomposes the global index space
/// over `comm.size()` ranks and builds this rank's neighbor topology.
///
/// # Example
/// ```no_run
/// use exchange::{create_domain, SingleProcess};
///
/// let domain = create_domain::<_, 3>("configs/periodic-cube.json", SingleProcess)?;
/// let mut rho = domain.new_field();
/// # Ok::<(), exchange::Error>(())
/// ```
pub fn create_domain<C: Communicator, const D: usize>(
    config_path: &str,
    comm: C,
) -> Result<DistributedDomain<C, D>> {
    let config = DecompositionConfig::load(config_path)?;
    tracing::info!("Loaded decomposition config '{}'", config.name);
    DistributedDomain::from_config(comm, &config)
}
