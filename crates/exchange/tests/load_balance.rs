//! Load balancing and repartition across thread-backed ranks
//!
//! Scenario: 400 particles packed into one quadrant of a 16x16 periodic
//! mesh, all initially owned by rank 0 of 4. These tests verify:
//! - The disabled sentinel and the check interval suppress repartitions
//! - A triggered repartition brings the imbalance under the threshold
//! - Field values follow their cells to the new owners
//! - Work varying only along a short axis is split along that axis

use exchange::{run_ranks, Communicator, DistributedDomain, LoadBalancer, LocalComm};
use layout::{DimTag, Field, Mesh, NdIndex, ParticleArrays, SubdomainTable};

const CELLS: [usize; 2] = [16, 16];

fn domain(comm: LocalComm, balancer: LoadBalancer) -> DistributedDomain<LocalComm, 2> {
    let global = NdIndex::from_extents(CELLS).unwrap();
    let table =
        SubdomainTable::new(global, [DimTag::Parallel; 2], [true, true], comm.size()).unwrap();
    let mesh = Mesh::from_bounds([0.0, 0.0], [1.0, 1.0], CELLS).unwrap();
    DistributedDomain::new(comm, table, mesh, 1, balancer, 1.5).unwrap()
}

/// 20x20 lattice in the lower-left quadrant, held by rank 0
fn clustered(rank: usize) -> ParticleArrays<2> {
    let mut pa = ParticleArrays::with_attributes(&[("w", 1)]);
    if rank == 0 {
        for j in 0..20 {
            for i in 0..20 {
                let x = [0.0125 + 0.025 * i as f64, 0.0125 + 0.025 * j as f64];
                pa.push((j * 20 + i) as u64, x, &[1.0]).unwrap();
            }
        }
    }
    pa
}

fn encode(p: &[i64; 2]) -> f64 {
    (p[0] + 100 * p[1]) as f64
}

#[test]
fn test_disabled_balancer_never_moves_anything() {
    let unchanged = run_ranks(4, |comm| {
        let mut d = domain(comm, LoadBalancer::disabled());
        let before = d.table().clone();
        let mut pa = clustered(d.rank());
        let mut fields = vec![d.new_field()];
        let fired = (0..10).any(|step| d.balance(step, &mut pa, &mut fields).unwrap().is_some());
        !fired && d.table() == &before
    });
    assert!(unchanged.iter().all(|&ok| ok), "disabled balancer repartitioned");
}

#[test]
fn test_checks_only_on_interval_steps() {
    let fired = run_ranks(4, |comm| {
        let mut d = domain(comm, LoadBalancer::new(0.5, 3));
        let mut pa = clustered(d.rank());
        let mut fields: Vec<Field<2>> = Vec::new();
        (1..=3)
            .map(|step| d.balance(step, &mut pa, &mut fields).unwrap().is_some())
            .collect::<Vec<_>>()
    });
    for (rank, f) in fired.iter().enumerate() {
        assert_eq!(f, &vec![false, false, true], "rank {rank}");
    }
}

#[test]
fn test_repartition_balances_particles_and_moves_fields() {
    let outcomes = run_ranks(4, |comm| {
        let mut d = domain(comm, LoadBalancer::new(0.5, 1));
        let mut pa = clustered(d.rank());
        let mut rho = d.new_field();
        rho.init_owned(|p| encode(&p));
        let mut fields = vec![rho];

        let report = d
            .balance(0, &mut pa, &mut fields)
            .unwrap()
            .expect("a 4x imbalance must trigger");

        let owned = *d.owned();
        let field: &Field<2> = &fields[0];
        let field_ok = field.owned() == &owned
            && field.owned_values().all(|(p, v)| v == encode(&p))
            && field.get(&[owned.lo()[0] - 1, owned.lo()[1]])
                == Some(encode(&[
                    (owned.lo()[0] - 1).rem_euclid(16),
                    owned.lo()[1],
                ]));
        let particles_ok = pa.positions.iter().all(|x| d.owns(x));
        let total = d.comm().all_reduce_sum(pa.len() as f64).unwrap();
        (report, pa.len(), field_ok, particles_ok, total)
    });

    for (rank, (report, count, field_ok, particles_ok, total)) in outcomes.into_iter().enumerate() {
        assert!(report.table_changed, "rank {rank}: table did not change");
        assert!((report.before.ratio - 3.0).abs() < 1e-12, "rank {rank}: {report:?}");
        assert!(report.balanced, "rank {rank}: still imbalanced: {report:?}");
        assert!(report.after.ratio <= 0.5, "rank {rank}: {report:?}");
        assert_eq!(count, 100, "rank {rank} holds {count} particles");
        assert_eq!(total, 400.0);
        assert!(field_ok, "rank {rank}: field values did not follow their cells");
        assert!(particles_ok, "rank {rank} holds particles outside its new box");
    }
}

#[test]
fn test_repartition_cuts_along_the_axis_the_work_varies_on() {
    // 16x4 cells; every particle sits in x-cell 0, 100 per y-cell
    let cells = [16, 4];
    let outcomes = run_ranks(4, |comm| {
        let global = NdIndex::from_extents(cells).unwrap();
        let table =
            SubdomainTable::new(global, [DimTag::Parallel; 2], [true, true], comm.size()).unwrap();
        let mesh = Mesh::from_bounds([0.0, 0.0], [1.0, 0.25], cells).unwrap();
        let mut d =
            DistributedDomain::new(comm, table, mesh, 1, LoadBalancer::new(0.25, 1), 1.0).unwrap();

        let mut pa = ParticleArrays::new();
        if d.rank() == 0 {
            for k in 0..400 {
                let y = 0.25 * (k as f64 + 0.5) / 400.0;
                pa.push(k as u64, [0.03, y], &[]).unwrap();
            }
        }
        let mut fields: Vec<Field<2>> = Vec::new();
        let report = d.balance(0, &mut pa, &mut fields).unwrap();
        (report, *d.owned(), pa.len())
    });

    for (rank, (report, owned, count)) in outcomes.into_iter().enumerate() {
        let report = report.expect("all particles on one rank must trigger");
        assert!((report.before.ratio - 3.0).abs() < 1e-12, "rank {rank}: {report:?}");
        assert!(report.balanced, "rank {rank}: {report:?}");
        assert_eq!(report.after.ratio, 0.0, "rank {rank}: {report:?}");
        assert_eq!(owned.extent(0), 16, "rank {rank} owns {owned}, cut across x");
        assert_eq!(count, 100, "rank {rank} holds {count} particles");
    }
}

#[test]
fn test_single_rank_is_never_rebalanced() {
    let out = run_ranks(1, |comm| {
        let mut d = domain(comm, LoadBalancer::new(0.0, 1));
        let mut pa = clustered(0);
        let mut fields: Vec<Field<2>> = Vec::new();
        d.balance(0, &mut pa, &mut fields).unwrap()
    });
    assert!(out[0].is_none());
}
