//! Per-rank neighbor topology: which boxes to send and receive in every direction.
//!
//! For every direction `w` the ghost slab of the local box is intersected
//! with every rank's box under every periodic image. Each non-empty overlap
//! becomes a receive link. The peer on the other end computes the same
//! overlap from its own side, translates it back into its owned cells and
//! files it as a send link under the opposite direction. Both ends derive the
//! link tag from `(w, image)`, which is what ties a send to its receive.
//!
//! Ranges in links are local view coordinates: the owned box starts at `g`
//! along every dimension.

use std::array;

use crate::check_dim;
use crate::decomposition::SubdomainTable;
use crate::direction::{image_count, image_index, Category, DirectionTable};
use crate::error::{LayoutError, Result};
use crate::index::NdIndex;

/// One send or receive region shared with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaloLink<const D: usize> {
    /// Peer rank. Equal to the local rank for self-wrap.
    pub rank: usize,
    /// Direction table index the link is filed under.
    pub direction: usize,
    /// Link tag, identical on both ends of the transfer.
    pub tag: u32,
    /// Region in local view coordinates.
    pub range: NdIndex<D>,
    /// Periodic image shift (in cells) applied to the peer's box.
    pub shift: [i64; D],
}

/// Send and receive links of one rank, per direction.
#[derive(Debug, Clone)]
pub struct NeighborTopology<const D: usize> {
    rank: usize,
    owned: NdIndex<D>,
    ghost_width: usize,
    directions: DirectionTable<D>,
    recv: Vec<Vec<HaloLink<D>>>,
    send: Vec<Vec<HaloLink<D>>>,
}

impl<const D: usize> NeighborTopology<D> {
    /// Compute the links of `rank` for ghost width `ghost_width`.
    pub fn build(table: &SubdomainTable<D>, rank: usize, ghost_width: usize) -> Result<Self> {
        check_dim::<D>()?;
        if rank >= table.nranks() {
            return Err(LayoutError::InvalidPartition(format!(
                "rank {rank} not in a table of {} ranks",
                table.nranks()
            )));
        }
        let global = table.global();
        let periodic = table.periodic();
        for d in 0..D {
            if periodic[d] && ghost_width > global.extent(d) {
                return Err(LayoutError::GhostTooWide {
                    ghost: ghost_width,
                    extent: global.extent(d),
                    dim: d,
                });
            }
        }

        let directions = DirectionTable::<D>::new();
        let owned = *table.domain(rank);
        let mut topo = Self {
            rank,
            owned,
            ghost_width,
            recv: vec![Vec::new(); directions.len()],
            send: vec![Vec::new(); directions.len()],
            directions,
        };
        if ghost_width == 0 {
            return Ok(topo);
        }

        let images = periodic_images(global, periodic);
        let ndirs = topo.directions.len();
        let nimages = image_count::<D>() as u32;

        for w in 0..ndirs {
            let offset = topo.directions.get(w).offset();
            let opposite = topo.directions.matched(w);
            let Some(slab) = owned.slab(&offset, ghost_width) else {
                continue;
            };

            for (image, shift) in &images {
                let tag = w as u32 * nimages + *image as u32;
                let unshifted = shift.iter().all(|&s| s == 0);

                for (q, peer) in table.domains().iter().enumerate() {
                    if q == rank && unshifted {
                        continue;
                    }

                    // What q's image fills in our ghost slab
                    if let Some(overlap) = slab.intersect(&peer.translate(*shift)) {
                        let range = topo.to_local(&overlap);
                        topo.recv[w].push(HaloLink {
                            rank: q,
                            direction: w,
                            tag,
                            range,
                            shift: *shift,
                        });
                    }

                    // What our image fills in q's ghost slab
                    if q == rank {
                        continue;
                    }
                    let Some(peer_slab) = peer.slab(&offset, ghost_width) else {
                        continue;
                    };
                    if let Some(overlap) = peer_slab.intersect(&owned.translate(*shift)) {
                        let range = topo.to_local(&overlap.translate(shift.map(|s| -s)));
                        topo.send[opposite].push(HaloLink {
                            rank: q,
                            direction: opposite,
                            tag,
                            range,
                            shift: *shift,
                        });
                    }
                }
            }
        }

        tracing::debug!(
            "rank {} topology over {}: {} recv links, {} send links",
            rank,
            owned,
            topo.recv.iter().map(Vec::len).sum::<usize>(),
            topo.send.iter().map(Vec::len).sum::<usize>()
        );
        Ok(topo)
    }

    /// Rank the topology was built for.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Owned box in global coordinates.
    pub fn owned(&self) -> &NdIndex<D> {
        &self.owned
    }

    /// Ghost width.
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    /// Direction table the links are indexed by.
    pub fn directions(&self) -> &DirectionTable<D> {
        &self.directions
    }

    /// Ghost regions filled from peers in direction `w`.
    pub fn recv_links(&self, w: usize) -> &[HaloLink<D>] {
        &self.recv[w]
    }

    /// Owned regions sent to peers lying in direction `w`.
    pub fn send_links(&self, w: usize) -> &[HaloLink<D>] {
        &self.send[w]
    }

    /// Receive links of every direction in `category`.
    pub fn recv_in(&self, category: Category) -> impl Iterator<Item = &HaloLink<D>> {
        self.directions
            .category_range(category)
            .flat_map(move |w| self.recv[w].iter())
    }

    /// Send links of every direction in `category`.
    pub fn send_in(&self, category: Category) -> impl Iterator<Item = &HaloLink<D>> {
        self.directions
            .category_range(category)
            .flat_map(move |w| self.send[w].iter())
    }

    /// Distinct peer ranks in direction `w`, empty on a non-periodic boundary.
    pub fn neighbors(&self, w: usize) -> Vec<usize> {
        let mut ranks: Vec<usize> = self.recv[w].iter().map(|l| l.rank).collect();
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    /// Global box to local view coordinates.
    pub fn to_local(&self, range: &NdIndex<D>) -> NdIndex<D> {
        let g = self.ghost_width as i64;
        let lo = self.owned.lo();
        range.translate(array::from_fn(|d| g - lo[d]))
    }

    /// Local view box to global coordinates.
    pub fn to_global(&self, range: &NdIndex<D>) -> NdIndex<D> {
        let g = self.ghost_width as i64;
        let lo = self.owned.lo();
        range.translate(array::from_fn(|d| lo[d] - g))
    }
}

/// Image index and shift of every periodic image of the global box,
/// including the identity. Non-periodic dimensions never shift.
fn periodic_images<const D: usize>(
    global: &NdIndex<D>,
    periodic: &[bool; D],
) -> Vec<(usize, [i64; D])> {
    let mut images = Vec::new();
    for idx in 0..image_count::<D>() {
        let signs: [i8; D] = array::from_fn(|d| ((idx / 3usize.pow(d as u32)) % 3) as i8 - 1);
        if (0..D).any(|d| signs[d] != 0 && !periodic[d]) {
            continue;
        }
        debug_assert_eq!(image_index(&signs), idx);
        let shift = array::from_fn(|d| signs[d] as i64 * global.extent(d) as i64);
        images.push((idx, shift));
    }
    images
}
