//! Recursive-bisection decomposition and the subdomain table.
//!
//! The global box is split into one box per rank. At every node of the
//! bisection the ranks are divided as evenly as the geometry allows and the
//! box is cut across its longest parallel dimension. With a [`WorkEstimate`]
//! every feasible parallel dimension is tried, the cut is placed where the
//! cumulative slab weight matches the rank fraction, and the dimension whose
//! cut misses that fraction by the least wins. Ties go to the longer extent.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::check_dim;
use crate::error::{LayoutError, Result};
use crate::index::NdIndex;

/// Whether a dimension is divided among ranks or kept whole on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimTag {
    /// Split across ranks
    Parallel,
    /// Replicated whole on every rank
    Serial,
}

/// Dense per-cell work weights over a box, dimension 0 fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkEstimate<const D: usize> {
    domain: NdIndex<D>,
    weights: Vec<f64>,
}

impl<const D: usize> WorkEstimate<D> {
    /// All-zero estimate over `domain`.
    pub fn new(domain: NdIndex<D>) -> Self {
        Self {
            domain,
            weights: vec![0.0; domain.volume()],
        }
    }

    /// Estimate from precomputed weights, one per cell of `domain`.
    pub fn from_weights(domain: NdIndex<D>, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != domain.volume() {
            return Err(LayoutError::WorkShape {
                expected: domain.volume(),
                got: weights.len(),
            });
        }
        Ok(Self { domain, weights })
    }

    /// Box the weights cover.
    pub fn domain(&self) -> &NdIndex<D> {
        &self.domain
    }

    /// Raw weights, dimension 0 fastest.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Mutable raw weights, for element-wise reductions.
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Add `amount` to `cell`.
    pub fn add(&mut self, cell: &[i64; D], amount: f64) -> Result<()> {
        if !self.domain.contains(cell) {
            return Err(LayoutError::OutOfRange {
                index: cell.to_vec(),
                region: self.domain.to_string(),
            });
        }
        let i = self.domain.offset_of(cell);
        self.weights[i] += amount;
        Ok(())
    }

    /// Sum over every cell.
    pub fn total(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Weight of each slab of `range` perpendicular to `dim`.
    fn slab_weights(&self, range: &NdIndex<D>, dim: usize) -> Vec<f64> {
        let lo = range.lo()[dim];
        let mut slabs = vec![0.0; range.extent(dim)];
        for p in range.iter() {
            slabs[(p[dim] - lo) as usize] += self.weights[self.domain.offset_of(&p)];
        }
        slabs
    }
}

/// Split `global` into `nranks` disjoint boxes by recursive bisection.
///
/// Serial dimensions are never cut. Leaves are numbered depth-first, left
/// half first, so rank `r` owns element `r` of the result.
pub fn bisect<const D: usize>(
    global: &NdIndex<D>,
    tags: &[DimTag; D],
    nranks: usize,
    work: Option<&WorkEstimate<D>>,
) -> Result<Vec<NdIndex<D>>> {
    check_dim::<D>()?;
    if nranks == 0 {
        return Err(LayoutError::NoRanks);
    }
    let cells = parallel_volume(global, tags);
    if nranks > cells {
        return Err(LayoutError::TooManyRanks {
            ranks: nranks,
            cells,
        });
    }
    if let Some(w) = work {
        if w.domain() != global {
            return Err(LayoutError::WorkShape {
                expected: global.volume(),
                got: w.weights().len(),
            });
        }
    }

    let mut leaves = Vec::with_capacity(nranks);
    split_node(global, tags, nranks, work, &mut leaves)?;
    Ok(leaves)
}

/// Product of the extents along parallel dimensions.
fn parallel_volume<const D: usize>(range: &NdIndex<D>, tags: &[DimTag; D]) -> usize {
    (0..D)
        .filter(|&d| tags[d] == DimTag::Parallel)
        .map(|d| range.extent(d))
        .product()
}

fn split_node<const D: usize>(
    node: &NdIndex<D>,
    tags: &[DimTag; D],
    n: usize,
    work: Option<&WorkEstimate<D>>,
    leaves: &mut Vec<NdIndex<D>>,
) -> Result<()> {
    if n == 1 {
        leaves.push(*node);
        return Ok(());
    }

    // Rank splits closest to even first
    let mut splits: Vec<usize> = (1..n).collect();
    splits.sort_by_key(|&k| ((2 * k).abs_diff(n), k));

    // Longest parallel dimension first, ties by index
    let mut dims: Vec<usize> = (0..D).filter(|&d| tags[d] == DimTag::Parallel).collect();
    dims.sort_by_key(|&d| Reverse(node.extent(d)));

    for n_left in splits {
        let n_right = n - n_left;
        // Best feasible cut as (dim, thickness, miss); dims are longest first
        let mut best: Option<(usize, usize, f64)> = None;
        for &dim in &dims {
            let extent = node.extent(dim);
            let cross: usize = dims
                .iter()
                .filter(|&&d| d != dim)
                .map(|&d| node.extent(d))
                .product();
            let min_left = n_left.div_ceil(cross);
            let min_right = n_right.div_ceil(cross);
            if min_left + min_right > extent {
                continue;
            }
            let (t_min, t_max) = (min_left, extent - min_right);

            let Some(w) = work else {
                let target = ((extent * n_left) as f64 / n as f64).round() as usize;
                best = Some((dim, target.clamp(t_min, t_max), 0.0));
                break;
            };
            let (target, miss) =
                weighted_cut(w, node, dim, n_left as f64 / n as f64, t_min, t_max);
            if best.map_or(true, |(_, _, m)| miss < m) {
                best = Some((dim, target.clamp(t_min, t_max), miss));
            }
        }
        let Some((dim, thickness, _)) = best else {
            continue;
        };

        let at = node.lo()[dim] + thickness as i64;
        let (left, right) = node.split(dim, at).ok_or_else(|| {
            LayoutError::InvalidPartition(format!("cut at {at} along {dim} leaves {node} empty"))
        })?;
        debug!(
            "bisect {} ranks of {}: {} | {} along dim {}",
            n, node, n_left, n_right, dim
        );
        split_node(&left, tags, n_left, work, leaves)?;
        split_node(&right, tags, n_right, work, leaves)?;
        return Ok(());
    }

    Err(LayoutError::TooManyRanks {
        ranks: n,
        cells: parallel_volume(node, tags),
    })
}

/// Thickness in `[t_min, t_max]` whose cumulative slab weight is closest to
/// `fraction` of the node's total weight, with the absolute miss.
fn weighted_cut<const D: usize>(
    work: &WorkEstimate<D>,
    node: &NdIndex<D>,
    dim: usize,
    fraction: f64,
    t_min: usize,
    t_max: usize,
) -> (usize, f64) {
    let slabs = work.slab_weights(node, dim);
    let total: f64 = slabs.iter().sum();
    if total <= 0.0 {
        return (((node.extent(dim) as f64) * fraction).round() as usize, 0.0);
    }
    let goal = fraction * total;

    let mut cumulative: f64 = slabs[..t_min].iter().sum();
    let mut best = (t_min, (cumulative - goal).abs());
    for t in t_min + 1..=t_max {
        cumulative += slabs[t - 1];
        let miss = (cumulative - goal).abs();
        if miss < best.1 {
            best = (t, miss);
        }
    }
    best
}

/// Global box, decomposition flags and one owned box per rank.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdomainTable<const D: usize> {
    global: NdIndex<D>,
    tags: [DimTag; D],
    periodic: [bool; D],
    domains: Vec<NdIndex<D>>,
}

impl<const D: usize> SubdomainTable<D> {
    /// Even decomposition of `global` over `nranks` ranks.
    pub fn new(
        global: NdIndex<D>,
        tags: [DimTag; D],
        periodic: [bool; D],
        nranks: usize,
    ) -> Result<Self> {
        let domains = bisect(&global, &tags, nranks, None)?;
        Self::from_domains(global, tags, periodic, domains)
    }

    /// Work-weighted decomposition.
    pub fn with_work(
        global: NdIndex<D>,
        tags: [DimTag; D],
        periodic: [bool; D],
        nranks: usize,
        work: &WorkEstimate<D>,
    ) -> Result<Self> {
        let domains = bisect(&global, &tags, nranks, Some(work))?;
        Self::from_domains(global, tags, periodic, domains)
    }

    /// Table from explicit boxes, checked to partition `global` exactly.
    pub fn from_domains(
        global: NdIndex<D>,
        tags: [DimTag; D],
        periodic: [bool; D],
        domains: Vec<NdIndex<D>>,
    ) -> Result<Self> {
        check_dim::<D>()?;
        if domains.is_empty() {
            return Err(LayoutError::NoRanks);
        }
        for (rank, dom) in domains.iter().enumerate() {
            if !global.contains_box(dom) {
                return Err(LayoutError::InvalidPartition(format!(
                    "rank {rank} box {dom} leaves global {global}"
                )));
            }
            for d in 0..D {
                if tags[d] == DimTag::Serial && dom.extent(d) != global.extent(d) {
                    return Err(LayoutError::InvalidPartition(format!(
                        "rank {rank} box {dom} does not span serial dimension {d}"
                    )));
                }
            }
        }
        for (a, da) in domains.iter().enumerate() {
            for (b, db) in domains.iter().enumerate().skip(a + 1) {
                if let Some(overlap) = da.intersect(db) {
                    return Err(LayoutError::InvalidPartition(format!(
                        "ranks {a} and {b} overlap on {overlap}"
                    )));
                }
            }
        }
        let covered: usize = domains.iter().map(NdIndex::volume).sum();
        if covered != global.volume() {
            return Err(LayoutError::InvalidPartition(format!(
                "boxes cover {covered} of {} cells",
                global.volume()
            )));
        }
        Ok(Self {
            global,
            tags,
            periodic,
            domains,
        })
    }

    /// New table for the same ranks, weighted by `work`.
    pub fn repartition(&self, work: &WorkEstimate<D>) -> Result<Self> {
        Self::with_work(self.global, self.tags, self.periodic, self.nranks(), work)
    }

    /// Whole index space.
    pub fn global(&self) -> &NdIndex<D> {
        &self.global
    }

    /// Parallel/serial flag per dimension.
    pub fn tags(&self) -> &[DimTag; D] {
        &self.tags
    }

    /// Periodicity per dimension.
    pub fn periodic(&self) -> &[bool; D] {
        &self.periodic
    }

    /// Owned box of every rank, indexed by rank.
    pub fn domains(&self) -> &[NdIndex<D>] {
        &self.domains
    }

    /// Owned box of `rank`.
    pub fn domain(&self, rank: usize) -> &NdIndex<D> {
        &self.domains[rank]
    }

    /// Number of ranks.
    pub fn nranks(&self) -> usize {
        self.domains.len()
    }

    /// Rank owning `cell`, if it lies in the global box.
    pub fn owner_of_cell(&self, cell: &[i64; D]) -> Option<usize> {
        self.domains.iter().position(|d| d.contains(cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAR2: [DimTag; 2] = [DimTag::Parallel, DimTag::Parallel];

    fn assert_partition<const D: usize>(global: &NdIndex<D>, boxes: &[NdIndex<D>]) {
        let mut seen = vec![0u32; global.volume()];
        for b in boxes {
            for p in b.iter() {
                seen[global.offset_of(&p)] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1), "boxes {boxes:?} do not tile {global}");
    }

    #[test]
    fn test_even_split_of_a_line() {
        let global = NdIndex::from_extents([4]).unwrap();
        let boxes = bisect(&global, &[DimTag::Parallel], 2, None).unwrap();
        assert_eq!(boxes, vec![NdIndex::new([0], [1]).unwrap(), NdIndex::new([2], [3]).unwrap()]);
    }

    #[test]
    fn test_four_ranks_on_a_square() {
        let global = NdIndex::from_extents([8, 8]).unwrap();
        let boxes = bisect(&global, &PAR2, 4, None).unwrap();
        assert_partition(&global, &boxes);
        assert!(boxes.iter().all(|b| b.volume() == 16));
    }

    #[test]
    fn test_odd_rank_counts_tile_the_domain() {
        let global = NdIndex::from_extents([7, 5, 3]).unwrap();
        let tags = [DimTag::Parallel; 3];
        for n in 1..=20 {
            let boxes = bisect(&global, &tags, n, None).unwrap();
            assert_eq!(boxes.len(), n);
            assert_partition(&global, &boxes);
        }
    }

    #[test]
    fn test_every_parallel_cell_can_be_a_rank() {
        let global = NdIndex::from_extents([3, 3]).unwrap();
        let boxes = bisect(&global, &PAR2, 9, None).unwrap();
        assert_partition(&global, &boxes);
        assert!(boxes.iter().all(|b| b.volume() == 1));
    }

    #[test]
    fn test_serial_dimension_stays_whole() {
        let global = NdIndex::from_extents([8, 6]).unwrap();
        let tags = [DimTag::Serial, DimTag::Parallel];
        let boxes = bisect(&global, &tags, 3, None).unwrap();
        assert_partition(&global, &boxes);
        assert!(boxes.iter().all(|b| b.extent(0) == 8));
    }

    #[test]
    fn test_too_many_ranks_is_fatal() {
        let global = NdIndex::from_extents([4, 100]).unwrap();
        let tags = [DimTag::Parallel, DimTag::Serial];
        let err = bisect(&global, &tags, 5, None).unwrap_err();
        assert_eq!(err, LayoutError::TooManyRanks { ranks: 5, cells: 4 });
        assert_eq!(bisect(&global, &tags, 0, None).unwrap_err(), LayoutError::NoRanks);
    }

    #[test]
    fn test_weighted_cut_follows_the_work() {
        let global = NdIndex::from_extents([8]).unwrap();
        // All work in the first two cells
        let mut work = WorkEstimate::new(global);
        work.add(&[0], 10.0).unwrap();
        work.add(&[1], 10.0).unwrap();
        let boxes = bisect(&global, &[DimTag::Parallel], 2, Some(&work)).unwrap();
        assert_eq!(boxes[0], NdIndex::new([0], [0]).unwrap());
        assert_eq!(boxes[1], NdIndex::new([1], [7]).unwrap());
    }

    #[test]
    fn test_weighted_split_picks_the_dimension_the_work_varies_along() {
        // Work confined to column x = 0 and uniform in y: only y cuts can balance
        let global = NdIndex::from_extents([16, 4]).unwrap();
        let mut work = WorkEstimate::new(global);
        for y in 0..4 {
            work.add(&[0, y], 100.0).unwrap();
        }
        let boxes = bisect(&global, &PAR2, 4, Some(&work)).unwrap();
        assert_partition(&global, &boxes);
        for b in &boxes {
            assert_eq!(b.extent(0), 16, "{b} cuts x instead of y");
            assert_eq!(b.extent(1), 1);
        }
    }

    #[test]
    fn test_symmetric_work_keeps_longest_dimension_cut() {
        let global = NdIndex::from_extents([8, 4]).unwrap();
        let work = WorkEstimate::from_weights(global, vec![1.0; 32]).unwrap();
        let weighted = bisect(&global, &PAR2, 2, Some(&work)).unwrap();
        assert_eq!(weighted, bisect(&global, &PAR2, 2, None).unwrap());
        assert_eq!(weighted[0], NdIndex::new([0, 0], [3, 3]).unwrap());
    }

    #[test]
    fn test_zero_work_falls_back_to_proportional() {
        let global = NdIndex::from_extents([6]).unwrap();
        let work = WorkEstimate::new(global);
        let boxes = bisect(&global, &[DimTag::Parallel], 3, Some(&work)).unwrap();
        assert!(boxes.iter().all(|b| b.volume() == 2));
    }

    #[test]
    fn test_table_rejects_overlap_and_gaps() {
        let global = NdIndex::from_extents([4]).unwrap();
        let overlap = vec![NdIndex::new([0], [2]).unwrap(), NdIndex::new([2], [3]).unwrap()];
        assert!(matches!(
            SubdomainTable::from_domains(global, [DimTag::Parallel], [false], overlap),
            Err(LayoutError::InvalidPartition(_))
        ));
        let gap = vec![NdIndex::new([0], [0]).unwrap(), NdIndex::new([2], [3]).unwrap()];
        assert!(SubdomainTable::from_domains(global, [DimTag::Parallel], [false], gap).is_err());
    }

    #[test]
    fn test_owner_lookup() {
        let global = NdIndex::from_extents([4, 4]).unwrap();
        let table = SubdomainTable::new(global, PAR2, [true, true], 4).unwrap();
        for p in global.iter() {
            let owner = table.owner_of_cell(&p).unwrap();
            assert!(table.domain(owner).contains(&p));
        }
        assert_eq!(table.owner_of_cell(&[4, 0]), None);
    }

    #[test]
    fn test_repartition_keeps_rank_count() {
        let global = NdIndex::from_extents([16]).unwrap();
        let table = SubdomainTable::new(global, [DimTag::Parallel], [true], 4).unwrap();
        let weights = (0..16).map(|i| if i < 4 { 8.0 } else { 1.0 }).collect();
        let work = WorkEstimate::from_weights(global, weights).unwrap();
        let next = table.repartition(&work).unwrap();
        assert_eq!(next.nranks(), 4);
        assert!(next.domain(0).volume() < table.domain(0).volume());
    }

    #[test]
    fn test_work_shape_is_checked() {
        let global = NdIndex::from_extents([4]).unwrap();
        assert_eq!(
            WorkEstimate::from_weights(global, vec![1.0; 3]).unwrap_err(),
            LayoutError::WorkShape { expected: 4, got: 3 }
        );
    }
}
