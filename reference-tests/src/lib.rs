//! Reference test framework for distributed domain validation
//!
//! Each reference test loads a decomposition config, runs a rank group on
//! threads and validates the cross-rank properties of the exchange layer:
//! ghost wrap after fill, mass conservation of accumulate, particle count
//! and ownership after every redistribution, and the imbalance left by a
//! repartition.


use std::array;

use exchange::{run_ranks, Communicator, DecompositionConfig, DistributedDomain, LocalComm};
use layout::{NdIndex, ParticleArrays};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Ghost values after fill
    pub wrap: Option<WrapCheck>,
    /// Field mass across accumulate
    pub conservation: Option<ConservationCheck>,
    /// Particle statistics after every update
    pub particles: Option<ParticleCheck>,
    /// Imbalance after each repartition
    pub balance: Option<BalanceCheck>,
}

/// Check that every ghost cell holds its wrapped owner's value after fill
#[derive(Debug, Clone)]
pub struct WrapCheck {
    /// Largest allowed number of wrong ghost cells, summed over ranks
    pub max_wrong_cells: usize,
}

/// Check that accumulate neither creates nor loses mass
#[derive(Debug, Clone)]
pub struct ConservationCheck {
    /// Maximum allowed relative mass error
    pub max_mass_error: f64,
}

/// Particle random walk with per-step statistics
#[derive(Debug, Clone)]
pub struct ParticleCheck {
    /// Particles seeded by every rank
    pub per_rank: usize,
    /// Largest step per dimension, in cells
    pub max_step_cells: f64,
    /// Seed density falling off towards the domain maximum
    pub skewed: bool,
}

/// Check the imbalance left by every repartition
#[derive(Debug, Clone)]
pub struct BalanceCheck {
    /// Maximum allowed `(max - avg) / avg` after a repartition
    pub max_imbalance: f64,
    /// Fewest repartitions the run must trigger
    pub min_repartitions: usize,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of ranks
    pub ranks: usize,
    /// Number of steps executed
    pub steps: usize,
    /// Repartitions triggered
    pub repartitions: usize,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: Some(message),
        }
    }

    fn fail(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: Some(message),
        }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Number of ranks to run
    pub ranks: usize,
    /// Number of particle steps
    pub steps: usize,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// Per-step particle statistics gathered on every rank
#[derive(Debug, Clone, Copy)]
struct CountStats {
    total: f64,
    min: f64,
    max: f64,
    misplaced: f64,
}

/// What one rank observed
#[derive(Debug, Default)]
struct RankOutcome {
    wrong_ghosts: usize,
    mass: Option<(f64, f64)>,
    counts: Vec<CountStats>,
    /// `(before, after)` imbalance of each repartition
    repartitions: Vec<(f64, f64)>,
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);
        if self.ranks == 0 {
            return Err("Reference test needs at least one rank".to_string());
        }

        let config = DecompositionConfig::load(&self.config_path).map_err(|e| e.to_string())?;
        tracing::info!(
            "Loaded '{}': {}D, cells {:?}, {} ranks",
            config.name,
            config.dim(),
            config.cells,
            self.ranks
        );

        let outcomes = match config.dim() {
            1 => self.run_group::<1>(&config),
            2 => self.run_group::<2>(&config),
            3 => self.run_group::<3>(&config),
            d => return Err(format!("Unsupported dimensionality {}", d)),
        }?;

        // Every rank computes identical collectives; rank 0 speaks for the group
        let wrong_ghosts: usize = outcomes.iter().map(|o| o.wrong_ghosts).sum();
        let root = &outcomes[0];

        let mut checks = Vec::new();
        let mut all_passed = true;

        if let Some(ref wrap) = self.expected.wrap {
            let check = validate_wrap(wrong_ghosts, wrap);
            all_passed &= check.passed;
            checks.push(check);
        }

        if let Some(ref conservation) = self.expected.conservation {
            let check = validate_conservation(root.mass, conservation);
            all_passed &= check.passed;
            checks.push(check);
        }

        if let Some(ref particles) = self.expected.particles {
            let expected_total = (particles.per_rank * self.ranks) as f64;
            let check = validate_particle_counts(&root.counts, expected_total);
            all_passed &= check.passed;
            checks.push(check);
        }

        if let Some(ref balance) = self.expected.balance {
            let check = validate_balance(&root.repartitions, balance);
            all_passed &= check.passed;
            checks.push(check);
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: all_passed,
            checks,
            ranks: self.ranks,
            steps: self.steps,
            repartitions: root.repartitions.len(),
        })
    }

    fn run_group<const D: usize>(
        &self,
        config: &DecompositionConfig,
    ) -> Result<Vec<RankOutcome>, String> {
        run_ranks(self.ranks, |comm| self.run_rank::<D>(comm, config))
            .into_iter()
            .enumerate()
            .map(|(rank, r)| r.map_err(|e| format!("rank {}: {}", rank, e)))
            .collect()
    }

    fn run_rank<const D: usize>(
        &self,
        comm: LocalComm,
        config: &DecompositionConfig,
    ) -> exchange::Result<RankOutcome> {
        let mut domain = DistributedDomain::<_, D>::from_config(comm, config)?;
        let global = *domain.table().global();
        let periodic = *domain.table().periodic();
        let mut outcome = RankOutcome::default();

        if self.expected.wrap.is_some() {
            let mut field = domain.new_field();
            field.init_owned(|p| encode(&p));
            domain.fill_halo(&mut field)?;
            outcome.wrong_ghosts = field
                .padded()
                .iter()
                .filter(|p| {
                    let expected = wrapped(p, &global, &periodic).map_or(0.0, |q| encode(&q));
                    field.get(p) != Some(expected)
                })
                .count();
        }

        if self.expected.conservation.is_some() {
            let mut field = domain.new_field();
            // Only cells with an owner somewhere; open-boundary ghosts have none
            for p in field.padded().iter() {
                if wrapped(&p, &global, &periodic).is_some() {
                    field.deposit(&p, 1.0 + 0.001 * encode(&p).abs())?;
                }
            }
            let before = domain.comm().all_reduce_sum(field.padded_sum())?;
            domain.accumulate_halo(&mut field)?;
            let after = domain.comm().all_reduce_sum(field.owned_sum())?;
            outcome.mass = Some((before, after));
        }

        if let Some(ref check) = self.expected.particles {
            let rank = domain.rank();
            let mut rng = Lcg::new(rank as u64);
            let (lower, upper) = domain.mesh().region(&global);
            let mut particles = ParticleArrays::<D>::with_attributes(&[("weight", 1)]);
            for i in 0..check.per_rank {
                let x = array::from_fn(|d| {
                    let u = rng.next();
                    let s = if check.skewed { 0.5 * (u + u * u) } else { u };
                    lower[d] + s * (upper[d] - lower[d])
                });
                particles.push((rank * check.per_rank + i) as u64, x, &[1.0])?;
            }
            let mut fields = vec![domain.new_field()];
            let spacing = domain.mesh().spacing();

            for step in 0..self.steps {
                domain.update(&mut particles)?;
                outcome.counts.push(count_stats(&domain, &particles)?);

                if let Some(report) = domain.balance(step as u64, &mut particles, &mut fields)? {
                    outcome
                        .repartitions
                        .push((report.before.ratio, report.after.ratio));
                }

                // Random walk
                for x in particles.positions.iter_mut() {
                    for d in 0..D {
                        x[d] += (2.0 * rng.next() - 1.0) * check.max_step_cells * spacing[d];
                    }
                }
            }
            domain.update(&mut particles)?;
            outcome.counts.push(count_stats(&domain, &particles)?);
        }

        Ok(outcome)
    }
}

/// Global count, per-rank spread, and particles held by the wrong rank
fn count_stats<const D: usize>(
    domain: &DistributedDomain<LocalComm, D>,
    particles: &ParticleArrays<D>,
) -> exchange::Result<CountStats> {
    let comm = domain.comm();
    let global = domain.table().global();
    let rank = domain.rank();
    let local = particles.len() as f64;
    let misplaced = particles
        .positions
        .iter()
        .filter(|x| {
            let cell = domain.mesh().clamped_cell(global, x);
            domain.table().owner_of_cell(&cell) != Some(rank)
        })
        .count() as f64;
    Ok(CountStats {
        total: comm.all_reduce_sum(local)?,
        min: -comm.all_reduce_max(-local)?,
        max: comm.all_reduce_max(local)?,
        misplaced: comm.all_reduce_sum(misplaced)?,
    })
}

/// Distinct value per global index
fn encode<const D: usize>(p: &[i64; D]) -> f64 {
    p.iter()
        .enumerate()
        .map(|(d, &x)| x as f64 * 1000f64.powi(d as i32))
        .sum()
}

/// `p` wrapped into `global` on periodic dimensions; `None` past an open boundary
fn wrapped<const D: usize>(
    p: &[i64; D],
    global: &NdIndex<D>,
    periodic: &[bool; D],
) -> Option<[i64; D]> {
    let mut q = *p;
    for d in 0..D {
        let (lo, len) = (global.lo()[d], global.extent(d) as i64);
        if periodic[d] {
            q[d] = lo + (q[d] - lo).rem_euclid(len);
        } else if q[d] < lo || q[d] >= lo + len {
            return None;
        }
    }
    Some(q)
}

/// Small deterministic generator so every run seeds the same particles
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ 0x2545_f491_4f6c_dd1d)
    }

    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Validate ghost values after fill
fn validate_wrap(wrong: usize, check: &WrapCheck) -> CheckResult {
    if wrong <= check.max_wrong_cells {
        CheckResult::pass("Ghost Wrap", format!("{} wrong ghost cells", wrong))
    } else {
        CheckResult::fail(
            "Ghost Wrap",
            format!("{} wrong ghost cells (limit: {})", wrong, check.max_wrong_cells),
        )
    }
}

/// Validate mass across accumulate
fn validate_conservation(mass: Option<(f64, f64)>, check: &ConservationCheck) -> CheckResult {
    let Some((before, after)) = mass else {
        return CheckResult::fail("Conservation", "No mass measured".to_string());
    };
    let error = (after - before).abs() / before.abs().max(f64::MIN_POSITIVE);
    if error <= check.max_mass_error {
        CheckResult::pass(
            "Conservation",
            format!("Before: {:.6}, After: {:.6} (error: {:.2e})", before, after, error),
        )
    } else {
        CheckResult::fail(
            "Conservation",
            format!(
                "Before: {:.6}, After: {:.6} (error: {:.2e}, limit: {:.2e})",
                before, after, error, check.max_mass_error
            ),
        )
    }
}

/// Validate particle totals and placement after every update
fn validate_particle_counts(counts: &[CountStats], expected_total: f64) -> CheckResult {
    if counts.is_empty() {
        return CheckResult::fail("Particle Counts", "No updates ran".to_string());
    }
    let lost: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, c)| c.total != expected_total)
        .map(|(i, _)| i)
        .collect();
    let misplaced: f64 = counts.iter().map(|c| c.misplaced).sum();
    let last = counts[counts.len() - 1];

    if lost.is_empty() && misplaced == 0.0 {
        CheckResult::pass(
            "Particle Counts",
            format!(
                "{} particles through {} updates (final per-rank min {}, max {})",
                expected_total,
                counts.len(),
                last.min,
                last.max
            ),
        )
    } else {
        CheckResult::fail(
            "Particle Counts",
            format!(
                "Total changed after updates {:?}; {} particles on the wrong rank",
                lost, misplaced
            ),
        )
    }
}

/// Validate the imbalance left by each repartition
fn validate_balance(repartitions: &[(f64, f64)], check: &BalanceCheck) -> CheckResult {
    if repartitions.len() < check.min_repartitions {
        return CheckResult::fail(
            "Load Balance",
            format!(
                "{} repartitions (expected at least {})",
                repartitions.len(),
                check.min_repartitions
            ),
        );
    }
    let worst = repartitions
        .iter()
        .map(|&(_, after)| after)
        .fold(0.0_f64, f64::max);
    let summary: Vec<String> = repartitions
        .iter()
        .map(|(before, after)| format!("{:.3} -> {:.3}", before, after))
        .collect();

    if worst <= check.max_imbalance {
        CheckResult::pass("Load Balance", summary.join(", "))
    } else {
        CheckResult::fail(
            "Load Balance",
            format!("{} (limit: {:.3})", summary.join(", "), check.max_imbalance),
        )
    }
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ranks: {}", self.ranks);
        println!("Steps: {}", self.steps);
        println!("Repartitions: {}", self.repartitions);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
