//! Per-rank orchestrator.
//!
//! A `DistributedDomain` owns the communicator handle, the current subdomain
//! table, this rank's neighbor topology and the reusable exchangers. Fields
//! and particles stay with the caller and are passed in per call, so a
//! repartition can hand back migrated fields without the domain holding
//! them.

use layout::{Field, Mesh, NdIndex, NeighborTopology, ParticleArrays, SubdomainTable};

use crate::balance::{Imbalance, LoadBalancer};
use crate::buffer::BufferPool;
use crate::comm::Communicator;
use crate::config::DecompositionConfig;
use crate::error::{Error, Result};
use crate::halo::HaloExchange;
use crate::repartition::{migrate_field, particle_work};
use crate::update::{ParticleUpdater, UpdateStats};

/// Outcome of a repartition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepartitionReport {
    /// Particle-count imbalance before the repartition
    pub before: Imbalance,
    /// Particle-count imbalance after particles moved
    pub after: Imbalance,
    /// Whether any rank's box changed
    pub table_changed: bool,
    /// Whether `after` is within the balancer's threshold
    pub balanced: bool,
}

/// One rank's view of a decomposed domain.
pub struct DistributedDomain<C: Communicator, const D: usize> {
    comm: C,
    table: SubdomainTable<D>,
    topology: NeighborTopology<D>,
    mesh: Mesh<D>,
    ghost_width: usize,
    halo: HaloExchange,
    updater: ParticleUpdater,
    balancer: LoadBalancer,
    migration: BufferPool,
}

impl<C: Communicator, const D: usize> DistributedDomain<C, D> {
    /// Domain over an existing table.
    ///
    /// The table must have one box per rank of `comm`.
    pub fn new(
        comm: C,
        table: SubdomainTable<D>,
        mesh: Mesh<D>,
        ghost_width: usize,
        balancer: LoadBalancer,
        overallocation: f64,
    ) -> Result<Self> {
        if table.nranks() != comm.size() {
            return Err(Error::LayoutMismatch(format!(
                "table has {} ranks, communicator has {}",
                table.nranks(),
                comm.size()
            )));
        }
        let topology = NeighborTopology::build(&table, comm.rank(), ghost_width)?;
        tracing::debug!(
            "Rank {}/{} owns {} ({} cells), ghost width {}",
            comm.rank(),
            comm.size(),
            topology.owned(),
            topology.owned().volume(),
            ghost_width
        );
        Ok(Self {
            comm,
            table,
            topology,
            mesh,
            ghost_width,
            halo: HaloExchange::new(overallocation),
            updater: ParticleUpdater::new(overallocation),
            balancer,
            migration: BufferPool::new(overallocation),
        })
    }

    /// Decompose the configured global box evenly over `comm.size()` ranks.
    pub fn from_config(comm: C, config: &DecompositionConfig) -> Result<Self> {
        let table = SubdomainTable::new(
            config.global::<D>()?,
            config.tags::<D>()?,
            config.periodic_flags::<D>()?,
            comm.size(),
        )?;
        if comm.rank() == 0 {
            tracing::info!(
                "Decomposed {} over {} ranks (ghost width {})",
                table.global(),
                table.nranks(),
                config.ghost_width
            );
        }
        let balancer = LoadBalancer::new(config.load_balance_threshold, config.load_balance_interval);
        Self::new(
            comm,
            table,
            config.mesh::<D>()?,
            config.ghost_width,
            balancer,
            config.overallocation,
        )
    }

    /// Communicator handle.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Current subdomain table.
    pub fn table(&self) -> &SubdomainTable<D> {
        &self.table
    }

    /// This rank's neighbor topology for the current table.
    pub fn topology(&self) -> &NeighborTopology<D> {
        &self.topology
    }

    /// Global mesh.
    pub fn mesh(&self) -> &Mesh<D> {
        &self.mesh
    }

    /// Ghost width.
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    /// This rank's owned box.
    pub fn owned(&self) -> &NdIndex<D> {
        self.topology.owned()
    }

    /// Load balancer settings.
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Whether a position (already wrapped) falls in this rank's box.
    pub fn owns(&self, x: &[f64; D]) -> bool {
        self.mesh.owns(self.topology.owned(), x)
    }

    /// Zero field over this rank's owned box and ghost layers.
    pub fn new_field(&self) -> Field<D> {
        Field::new(*self.topology.owned(), self.ghost_width)
    }

    /// Overwrite ghost cells with their owners' values.
    pub fn fill_halo(&mut self, field: &mut Field<D>) -> Result<()> {
        self.halo.fill_halo(&self.comm, &self.topology, field)
    }

    /// Add ghost contributions into their owners' cells.
    pub fn accumulate_halo(&mut self, field: &mut Field<D>) -> Result<()> {
        self.halo.accumulate_halo(&self.comm, &self.topology, field)
    }

    /// Send every particle to the rank owning its position.
    pub fn update(&mut self, particles: &mut ParticleArrays<D>) -> Result<UpdateStats> {
        self.updater
            .update(&self.comm, &self.table, &self.mesh, particles)
    }

    /// Check the particle-count imbalance at `step` and repartition when due.
    ///
    /// Collective: every rank must call this with the same step. Returns
    /// `None` when no repartition took place.
    pub fn balance(
        &mut self,
        step: u64,
        particles: &mut ParticleArrays<D>,
        fields: &mut [Field<D>],
    ) -> Result<Option<RepartitionReport>> {
        let work = particles.len() as f64;
        if !self.balancer.should_rebalance(&self.comm, work, step)? {
            return Ok(None);
        }
        self.repartition(particles, fields).map(Some)
    }

    /// Rebuild the table from the particle distribution and move data to it.
    ///
    /// Fields are replaced by their migrated versions with ghosts refilled.
    /// Particles are redistributed to the new owners. Missing the balance
    /// target is reported, not an error.
    pub fn repartition(
        &mut self,
        particles: &mut ParticleArrays<D>,
        fields: &mut [Field<D>],
    ) -> Result<RepartitionReport> {
        let before = self.balancer.measure(&self.comm, particles.len() as f64)?;
        let work = particle_work(&self.comm, &self.table, &self.mesh, particles)?;
        let table = self.table.repartition(&work)?;
        let table_changed = table != self.table;

        self.comm.barrier()?;
        for field in fields.iter_mut() {
            *field = migrate_field(&self.comm, &self.table, &table, field, &mut self.migration)?;
        }
        self.topology = NeighborTopology::build(&table, self.comm.rank(), self.ghost_width)?;
        self.table = table;

        self.updater
            .update(&self.comm, &self.table, &self.mesh, particles)?;
        for field in fields.iter_mut() {
            self.halo.fill_halo(&self.comm, &self.topology, field)?;
        }

        let after = self.balancer.measure(&self.comm, particles.len() as f64)?;
        let balanced = after.ratio <= self.balancer.threshold();
        if !balanced && self.comm.rank() == 0 {
            tracing::warn!(
                "Repartition left imbalance {:.3} above threshold {:.3}",
                after.ratio,
                self.balancer.threshold()
            );
        }
        if self.comm.rank() == 0 {
            tracing::info!(
                "Repartitioned {} ranks: imbalance {:.3} -> {:.3}{}",
                self.table.nranks(),
                before.ratio,
                after.ratio,
                if table_changed { "" } else { " (table unchanged)" }
            );
        }
        Ok(RepartitionReport {
            before,
            after,
            table_changed,
            balanced,
        })
    }
}
