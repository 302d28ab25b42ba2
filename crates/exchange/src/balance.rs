//! Load-imbalance detection.

use tracing::debug;

use crate::comm::Communicator;
use crate::error::Result;

/// Global work statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Imbalance {
    /// Largest per-rank work
    pub max: f64,
    /// Mean per-rank work
    pub average: f64,
    /// `(max - average) / average`, zero when there is no work
    pub ratio: f64,
}

impl Imbalance {
    /// Statistics from the global max and sum over `nranks` ranks.
    pub fn from_totals(max: f64, sum: f64, nranks: usize) -> Self {
        let average = if nranks == 0 { 0.0 } else { sum / nranks as f64 };
        let ratio = if average > 0.0 { (max - average) / average } else { 0.0 };
        Self {
            max,
            average,
            ratio,
        }
    }
}

/// Decides when a repartition is due.
///
/// A threshold of 1.0 or more disables balancing. The check itself is
/// collective, so every rank must call [`LoadBalancer::should_rebalance`]
/// with the same step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadBalancer {
    threshold: f64,
    interval: u64,
}

impl LoadBalancer {
    /// Balancer triggering when the ratio exceeds `threshold`, checked every
    /// `interval` steps (at least 1).
    pub fn new(threshold: f64, interval: u64) -> Self {
        Self {
            threshold,
            interval: interval.max(1),
        }
    }

    /// Balancer that never triggers.
    pub fn disabled() -> Self {
        Self::new(1.0, 1)
    }

    /// Imbalance ratio above which a repartition is requested.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Steps between checks.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether balancing can ever trigger on `nranks` ranks.
    pub fn is_enabled(&self, nranks: usize) -> bool {
        self.threshold < 1.0 && nranks > 1
    }

    /// Reduce the local work to global statistics.
    pub fn measure<C>(&self, comm: &C, work: f64) -> Result<Imbalance>
    where
        C: Communicator + ?Sized,
    {
        let max = comm.all_reduce_max(work)?;
        let sum = comm.all_reduce_sum(work)?;
        Ok(Imbalance::from_totals(max, sum, comm.size()))
    }

    /// Whether this step should repartition.
    ///
    /// Off-interval steps and a disabled balancer return `false` without
    /// communicating.
    pub fn should_rebalance<C>(&self, comm: &C, work: f64, step: u64) -> Result<bool>
    where
        C: Communicator + ?Sized,
    {
        if !self.is_enabled(comm.size()) || step % self.interval != 0 {
            return Ok(false);
        }
        let imbalance = self.measure(comm, work)?;
        let due = imbalance.ratio > self.threshold;
        debug!(
            "step {}: imbalance {:.3} (max {:.1}, avg {:.1}), threshold {:.3}",
            step, imbalance.ratio, imbalance.max, imbalance.average, self.threshold
        );
        Ok(due)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::disabled()
    }
}
