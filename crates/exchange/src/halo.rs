//! Ghost-cell fill and accumulate.
//!
//! Both operations walk the direction categories face, edge, vertex in that
//! order. Within a category, self-wrap links are served by a local copy,
//! then every send and receive of the category is posted in one
//! [`Communicator::exchange`] call, and every payload is unpacked before the
//! next category starts.
//!
//! - **fill**: owned send regions travel to the peers' ghost regions and
//!   overwrite them.
//! - **accumulate**: ghost regions travel back to the peers' owned regions
//!   and are added in. Ghost values are left in place.

use layout::{Category, Field, HaloLink, NeighborTopology, UnpackOp};
use tracing::trace;

use crate::buffer::BufferPool;
use crate::comm::{tags, Communicator, Envelope, Message, Tag};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fill,
    Accumulate,
}

impl Mode {
    fn tag_base(self) -> Tag {
        match self {
            Mode::Fill => tags::FILL,
            Mode::Accumulate => tags::ACCUMULATE,
        }
    }

    fn op(self) -> UnpackOp {
        match self {
            Mode::Fill => UnpackOp::Assign,
            Mode::Accumulate => UnpackOp::Add,
        }
    }
}

/// Halo exchanger holding reusable pack buffers.
#[derive(Debug, Clone, Default)]
pub struct HaloExchange {
    buffers: BufferPool,
}

impl HaloExchange {
    /// Create an exchanger whose pack buffers carry `overallocation` slack.
    pub fn new(overallocation: f64) -> Self {
        Self {
            buffers: BufferPool::new(overallocation),
        }
    }

    /// Overwrite every ghost cell with the owner's interior value.
    pub fn fill_halo<C, const D: usize>(
        &mut self,
        comm: &C,
        topology: &NeighborTopology<D>,
        field: &mut Field<D>,
    ) -> Result<()>
    where
        C: Communicator + ?Sized,
    {
        self.run(comm, topology, field, Mode::Fill)
    }

    /// Add every ghost cell into the owner's interior cell.
    pub fn accumulate_halo<C, const D: usize>(
        &mut self,
        comm: &C,
        topology: &NeighborTopology<D>,
        field: &mut Field<D>,
    ) -> Result<()>
    where
        C: Communicator + ?Sized,
    {
        self.run(comm, topology, field, Mode::Accumulate)
    }

    fn run<C, const D: usize>(
        &mut self,
        comm: &C,
        topology: &NeighborTopology<D>,
        field: &mut Field<D>,
        mode: Mode,
    ) -> Result<()>
    where
        C: Communicator + ?Sized,
    {
        check_layout(comm, topology, field)?;
        if topology.ghost_width() == 0 {
            return Ok(());
        }
        let me = comm.rank();
        let base = mode.tag_base();

        for category in Category::ALL {
            // Self-wrap: the periodic image of our own box
            let mut local_copies = 0;
            for link in topology.recv_in(category).filter(|l| l.rank == me) {
                let interior = link.range.translate(link.shift.map(|s| -s));
                match mode {
                    Mode::Fill => field.copy_region(&interior, &link.range, UnpackOp::Assign)?,
                    Mode::Accumulate => field.copy_region(&link.range, &interior, UnpackOp::Add)?,
                }
                local_copies += 1;
            }

            let remote_recv = topology.recv_in(category).filter(|l| l.rank != me);
            let (outgoing, incoming): (Vec<&HaloLink<D>>, Vec<&HaloLink<D>>) = match mode {
                Mode::Fill => (topology.send_in(category).collect(), remote_recv.collect()),
                Mode::Accumulate => (remote_recv.collect(), topology.send_in(category).collect()),
            };
            if outgoing.is_empty() && incoming.is_empty() {
                continue;
            }

            for (slot, link) in outgoing.iter().enumerate() {
                let buf = self.buffers.prepare(slot, link.range.volume() * 8);
                field.pack(&link.range, buf)?;
            }
            let messages: Vec<Message<'_>> = outgoing
                .iter()
                .enumerate()
                .map(|(slot, link)| Message {
                    dest: link.rank,
                    tag: base + link.tag as Tag,
                    payload: self.buffers.get(slot),
                })
                .collect();
            let envelopes: Vec<Envelope> = incoming
                .iter()
                .map(|link| Envelope {
                    source: link.rank,
                    tag: base + link.tag as Tag,
                })
                .collect();

            let payloads = comm.exchange(&messages, &envelopes)?;

            for ((link, env), bytes) in incoming.iter().zip(&envelopes).zip(&payloads) {
                let expected = link.range.volume() * 8;
                if bytes.len() != expected {
                    return Err(Error::SizeMismatch {
                        peer: env.source,
                        tag: env.tag,
                        expected,
                        received: bytes.len(),
                    });
                }
                field.unpack(&link.range, bytes, mode.op())?;
            }

            trace!(
                "{:?} {} on rank {}: {} sent, {} received, {} local",
                mode,
                category,
                me,
                messages.len(),
                envelopes.len(),
                local_copies
            );
        }
        Ok(())
    }
}

/// The field and topology must describe the same box on the calling rank.
fn check_layout<C, const D: usize>(
    comm: &C,
    topology: &NeighborTopology<D>,
    field: &Field<D>,
) -> Result<()>
where
    C: Communicator + ?Sized,
{
    if topology.rank() != comm.rank() {
        return Err(Error::LayoutMismatch(format!(
            "topology built for rank {} used on rank {}",
            topology.rank(),
            comm.rank()
        )));
    }
    if field.owned() != topology.owned() || field.ghost_width() != topology.ghost_width() {
        return Err(Error::LayoutMismatch(format!(
            "field over {} with {} ghosts does not match topology over {} with {} ghosts",
            field.owned(),
            field.ghost_width(),
            topology.owned(),
            topology.ghost_width()
        )));
    }
    Ok(())
}
