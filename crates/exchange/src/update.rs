//! Particle redistribution.
//!
//! After particles move, every rank wraps positions on periodic dimensions,
//! finds the owner of each particle from the cell its position falls in, and
//! ships departing records to their new owners in two phases: first the
//! per-peer count, then the packed records for peers with a non-zero count.
//! Departed slots are swap-removed and arrivals appended.

use layout::{Mesh, ParticleArrays, SubdomainTable};
use rayon::prelude::*;
use tracing::debug;

use crate::buffer::BufferPool;
use crate::comm::{tags, Communicator, Envelope, Message};
use crate::error::{Error, Result};

/// Outcome of one redistribution pass on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Particles that stayed
    pub kept: usize,
    /// Particles sent to other ranks
    pub sent: usize,
    /// Particles received from other ranks
    pub received: usize,
}

/// Redistributes particles to the ranks owning their positions.
#[derive(Debug, Clone, Default)]
pub struct ParticleUpdater {
    buffers: BufferPool,
}

impl ParticleUpdater {
    /// Create an updater whose send buffers carry `overallocation` slack.
    pub fn new(overallocation: f64) -> Self {
        Self {
            buffers: BufferPool::new(overallocation),
        }
    }

    /// Move every particle to the rank whose subdomain contains it.
    ///
    /// Positions outside a non-periodic boundary stay with the rank owning
    /// the nearest boundary cell.
    pub fn update<C, const D: usize>(
        &mut self,
        comm: &C,
        table: &SubdomainTable<D>,
        mesh: &Mesh<D>,
        particles: &mut ParticleArrays<D>,
    ) -> Result<UpdateStats>
    where
        C: Communicator + ?Sized,
    {
        let me = comm.rank();
        let nranks = comm.size();
        if table.nranks() != nranks {
            return Err(Error::LayoutMismatch(format!(
                "table has {} ranks, communicator has {}",
                table.nranks(),
                nranks
            )));
        }
        let global = *table.global();
        let periodic = *table.periodic();

        particles
            .positions
            .par_iter_mut()
            .for_each(|x| mesh.wrap(&global, &periodic, x));

        let owners: Vec<usize> = particles
            .positions
            .par_iter()
            .map(|x| {
                let cell = mesh.clamped_cell(&global, x);
                table.owner_of_cell(&cell).unwrap_or(me)
            })
            .collect();

        // Departing slots per destination, ascending
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nranks];
        for (slot, &owner) in owners.iter().enumerate() {
            if owner != me {
                outgoing[owner].push(slot);
            }
        }
        let departed: usize = outgoing.iter().map(Vec::len).sum();

        if nranks == 1 {
            return Ok(UpdateStats {
                kept: particles.len(),
                sent: 0,
                received: 0,
            });
        }

        let peers: Vec<usize> = (0..nranks).filter(|&r| r != me).collect();

        // Phase 1: counts to and from every peer
        let counts: Vec<u64> = outgoing.iter().map(|s| s.len() as u64).collect();
        let count_msgs: Vec<Message<'_>> = peers
            .iter()
            .map(|&q| Message {
                dest: q,
                tag: tags::PARTICLE_COUNT,
                payload: bytemuck::bytes_of(&counts[q]),
            })
            .collect();
        let count_envs: Vec<Envelope> = peers
            .iter()
            .map(|&q| Envelope {
                source: q,
                tag: tags::PARTICLE_COUNT,
            })
            .collect();
        let announced = comm.exchange(&count_msgs, &count_envs)?;

        let mut incoming = vec![0usize; nranks];
        for (env, bytes) in count_envs.iter().zip(&announced) {
            if bytes.len() != 8 {
                return Err(Error::SizeMismatch {
                    peer: env.source,
                    tag: env.tag,
                    expected: 8,
                    received: bytes.len(),
                });
            }
            incoming[env.source] = bytemuck::pod_read_unaligned::<u64>(bytes) as usize;
        }

        // Phase 2: records, only where a count was announced
        let record_bytes = particles.record_bytes();
        let senders: Vec<usize> = peers
            .iter()
            .copied()
            .filter(|&q| !outgoing[q].is_empty())
            .collect();
        for (slot, &q) in senders.iter().enumerate() {
            let buf = self.buffers.prepare(slot, outgoing[q].len() * record_bytes);
            particles.pack_records(&outgoing[q], buf);
        }
        let data_msgs: Vec<Message<'_>> = senders
            .iter()
            .enumerate()
            .map(|(slot, &q)| Message {
                dest: q,
                tag: tags::PARTICLE_DATA,
                payload: self.buffers.get(slot),
            })
            .collect();
        let data_envs: Vec<Envelope> = peers
            .iter()
            .copied()
            .filter(|&q| incoming[q] > 0)
            .map(|q| Envelope {
                source: q,
                tag: tags::PARTICLE_DATA,
            })
            .collect();
        let payloads = comm.exchange(&data_msgs, &data_envs)?;

        for (env, bytes) in data_envs.iter().zip(&payloads) {
            let expected = incoming[env.source] * record_bytes;
            if bytes.len() != expected {
                return Err(Error::SizeMismatch {
                    peer: env.source,
                    tag: env.tag,
                    expected,
                    received: bytes.len(),
                });
            }
        }

        let mut gone: Vec<usize> = outgoing.into_iter().flatten().collect();
        gone.sort_unstable();
        particles.remove(&gone);
        let kept = particles.len();

        let mut received = 0;
        for (env, bytes) in data_envs.iter().zip(&payloads) {
            particles.unpack_records(bytes, incoming[env.source])?;
            received += incoming[env.source];
        }

        debug!(
            "rank {} particle update: {} kept, {} sent, {} received",
            me, kept, departed, received
        );
        Ok(UpdateStats {
            kept,
            sent: departed,
            received,
        })
    }
}
