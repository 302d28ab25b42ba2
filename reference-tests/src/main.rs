//! Reference test binary entry point
//!
//! Runs every reference scenario against the configs in `configs/`.

use reference_tests::{
    BalanceCheck, ConservationCheck, ExpectedResult, ParticleCheck, ReferenceTest, TestResult,
    WrapCheck,
};
use tracing_subscriber::EnvFilter;

/// Ghost wrap, accumulate conservation and particle migration on a
/// fully periodic cube split over 8 ranks.
fn periodic_cube_test() -> ReferenceTest {
    ReferenceTest {
        name: "Periodic Cube".to_string(),
        config_path: "configs/periodic-cube.json".to_string(),
        ranks: 8,
        steps: 20,
        expected: ExpectedResult {
            wrap: Some(WrapCheck { max_wrong_cells: 0 }),
            conservation: Some(ConservationCheck {
                max_mass_error: 1e-12,
            }),
            particles: Some(ParticleCheck {
                per_rank: 2000,
                max_step_cells: 0.5,
                skewed: false,
            }),
            balance: None,
        },
    }
}

/// Open, serial y boundary: ghosts past it stay empty and particles
/// leaving it stay with the boundary owner.
fn open_slab_test() -> ReferenceTest {
    ReferenceTest {
        name: "Open Slab".to_string(),
        config_path: "configs/open-slab.json".to_string(),
        ranks: 3,
        steps: 20,
        expected: ExpectedResult {
            wrap: Some(WrapCheck { max_wrong_cells: 0 }),
            conservation: Some(ConservationCheck {
                max_mass_error: 1e-12,
            }),
            particles: Some(ParticleCheck {
                per_rank: 1500,
                max_step_cells: 0.75,
                skewed: false,
            }),
            balance: None,
        },
    }
}

/// Skewed seeding: the first check must repartition under the threshold.
fn balance_box_test() -> ReferenceTest {
    ReferenceTest {
        name: "Balance Box".to_string(),
        config_path: "configs/balance-box.json".to_string(),
        ranks: 4,
        steps: 20,
        expected: ExpectedResult {
            wrap: Some(WrapCheck { max_wrong_cells: 0 }),
            conservation: None,
            particles: Some(ParticleCheck {
                per_rank: 5000,
                max_step_cells: 0.25,
                skewed: true,
            }),
            balance: Some(BalanceCheck {
                max_imbalance: 0.25,
                min_repartitions: 1,
            }),
        },
    }
}

/// Get all reference tests
fn all_tests() -> Vec<ReferenceTest> {
    vec![periodic_cube_test(), open_slab_test(), balance_box_test()]
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tracing::info!("Domain Decomposition Reference Suite");
    tracing::info!("====================================");

    let tests = all_tests();
    tracing::info!("Found {} reference tests", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    // Print overall summary
    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    // Exit with error code if any tests failed
    if failed_count > 0 {
        std::process::exit(1);
    }
}
