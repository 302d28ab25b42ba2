//! Data movement for a table change.
//!
//! A repartition replaces every rank's owned box. Field values follow the
//! cells: each overlap between an old box and a new box is copied locally
//! when both belong to the same rank and sent point-to-point otherwise.

use layout::{Field, Mesh, ParticleArrays, SubdomainTable, UnpackOp, WorkEstimate};

use crate::buffer::BufferPool;
use crate::comm::{tags, Communicator, Envelope, Message};
use crate::error::{Error, Result};

/// Global per-cell particle counts.
///
/// Every rank bins its own particles by cell (wrapped on periodic dimensions,
/// clamped into the global box on open ones) and the bins are summed
/// element-wise, so all ranks hold the same estimate.
pub fn particle_work<C, const D: usize>(
    comm: &C,
    table: &SubdomainTable<D>,
    mesh: &Mesh<D>,
    particles: &ParticleArrays<D>,
) -> Result<WorkEstimate<D>>
where
    C: Communicator + ?Sized,
{
    let global = *table.global();
    let mut work = WorkEstimate::new(global);
    for x in &particles.positions {
        let mut x = *x;
        mesh.wrap(&global, table.periodic(), &mut x);
        work.add(&mesh.clamped_cell(&global, &x), 1.0)?;
    }
    comm.all_reduce_sum_vec(work.weights_mut())?;
    Ok(work)
}

/// Move `field` from its box in `old` to this rank's box in `new`.
///
/// The returned field has the same ghost width; its ghost cells are zero
/// until the next fill.
pub fn migrate_field<C, const D: usize>(
    comm: &C,
    old: &SubdomainTable<D>,
    new: &SubdomainTable<D>,
    field: &Field<D>,
    buffers: &mut BufferPool,
) -> Result<Field<D>>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let nranks = comm.size();
    if old.nranks() != nranks || new.nranks() != nranks {
        return Err(Error::LayoutMismatch(format!(
            "tables for {} and {} ranks used on {} ranks",
            old.nranks(),
            new.nranks(),
            nranks
        )));
    }
    if field.owned() != old.domain(me) {
        return Err(Error::LayoutMismatch(format!(
            "field over {} is not rank {}'s box {}",
            field.owned(),
            me,
            old.domain(me)
        )));
    }

    let mut moved = Field::new(*new.domain(me), field.ghost_width());

    // Cells that stay put
    if let Some(keep) = old.domain(me).intersect(new.domain(me)) {
        let buf = buffers.prepare(0, keep.volume() * 8);
        field.pack(&field.to_local(&keep), buf)?;
        moved.unpack(&moved.to_local(&keep), buffers.get(0), UnpackOp::Assign)?;
    }

    let targets: Vec<(usize, _)> = (0..nranks)
        .filter(|&q| q != me)
        .filter_map(|q| old.domain(me).intersect(new.domain(q)).map(|r| (q, r)))
        .collect();
    let sources: Vec<(usize, _)> = (0..nranks)
        .filter(|&p| p != me)
        .filter_map(|p| old.domain(p).intersect(new.domain(me)).map(|r| (p, r)))
        .collect();

    for (slot, (_, region)) in targets.iter().enumerate() {
        let buf = buffers.prepare(slot, region.volume() * 8);
        field.pack(&field.to_local(region), buf)?;
    }
    let messages: Vec<Message<'_>> = targets
        .iter()
        .enumerate()
        .map(|(slot, (q, _))| Message {
            dest: *q,
            tag: tags::REPARTITION,
            payload: buffers.get(slot),
        })
        .collect();
    let envelopes: Vec<Envelope> = sources
        .iter()
        .map(|(p, _)| Envelope {
            source: *p,
            tag: tags::REPARTITION,
        })
        .collect();

    let payloads = comm.exchange(&messages, &envelopes)?;

    for ((p, region), bytes) in sources.iter().zip(&payloads) {
        let expected = region.volume() * 8;
        if bytes.len() != expected {
            return Err(Error::SizeMismatch {
                peer: *p,
                tag: tags::REPARTITION,
                expected,
                received: bytes.len(),
            });
        }
        moved.unpack(&moved.to_local(region), bytes, UnpackOp::Assign)?;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use layout::{DimTag, NdIndex};

    #[test]
    fn test_particle_work_bins_by_cell() {
        let global = NdIndex::from_extents([4]).unwrap();
        let table = SubdomainTable::new(global, [DimTag::Parallel], [false], 1).unwrap();
        let mesh = Mesh::from_bounds([0.0], [4.0], [4]).unwrap();
        let mut pa = ParticleArrays::new();
        for (i, x) in [0.5, 0.6, 3.2, 9.0, -2.0].into_iter().enumerate() {
            pa.push(i as u64, [x], &[]).unwrap();
        }
        let work = particle_work(&SingleProcess, &table, &mesh, &pa).unwrap();
        // Out-of-range positions land in the boundary cells
        assert_eq!(work.weights(), &[3.0, 0.0, 0.0, 2.0]);
        assert_eq!(work.total(), 5.0);
    }

    #[test]
    fn test_particle_work_wraps_periodic_positions() {
        let global = NdIndex::from_extents([6]).unwrap();
        let table = SubdomainTable::new(global, [DimTag::Parallel], [true], 1).unwrap();
        let mesh = Mesh::from_bounds([0.0], [3.0], [6]).unwrap();
        let mut pa = ParticleArrays::new();
        for (i, x) in [3.4, -0.2, 1.2].into_iter().enumerate() {
            pa.push(i as u64, [x], &[]).unwrap();
        }
        let work = particle_work(&SingleProcess, &table, &mesh, &pa).unwrap();
        assert_eq!(work.weights(), &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        // Binning works on copies
        assert_eq!(pa.positions[0], [3.4]);
    }

    #[test]
    fn test_single_rank_migration_keeps_values() {
        let global = NdIndex::from_extents([5, 3]).unwrap();
        let table =
            SubdomainTable::new(global, [DimTag::Parallel; 2], [true, true], 1).unwrap();
        let mut f = Field::new(global, 1);
        f.init_owned(|p| (p[0] * 100 + p[1]) as f64);
        let moved =
            migrate_field(&SingleProcess, &table, &table, &f, &mut BufferPool::default()).unwrap();
        for (p, v) in f.owned_values() {
            assert_eq!(moved.get(&p), Some(v), "cell {p:?}");
        }
    }

    #[test]
    fn test_field_must_match_old_table() {
        let global = NdIndex::from_extents([4]).unwrap();
        let table = SubdomainTable::new(global, [DimTag::Parallel], [false], 1).unwrap();
        let f = Field::new(NdIndex::new([0], [1]).unwrap(), 1);
        let err = migrate_field(&SingleProcess, &table, &table, &f, &mut BufferPool::default())
            .unwrap_err();
        assert!(matches!(err, Error::LayoutMismatch(_)));
    }
}
