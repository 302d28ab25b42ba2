//! Reusable transfer buffers with over-allocation slack.

/// Pool of byte buffers reused across exchanges.
///
/// When a buffer has to grow it is sized to `needed * overallocation`, so
/// small fluctuations in message size (particle counts in particular) do
/// not reallocate on every call.
#[derive(Debug, Clone)]
pub struct BufferPool {
    overallocation: f64,
    buffers: Vec<Vec<u8>>,
    reallocations: usize,
}

impl BufferPool {
    /// Create an empty pool. Factors below 1.0 are treated as 1.0.
    pub fn new(overallocation: f64) -> Self {
        Self {
            overallocation: if overallocation.is_finite() { overallocation.max(1.0) } else { 1.0 },
            buffers: Vec::new(),
            reallocations: 0,
        }
    }

    /// Over-allocation factor in effect.
    pub fn overallocation(&self) -> f64 {
        self.overallocation
    }

    /// Number of times a buffer had to grow.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Cleared buffer `slot` with capacity for at least `needed` bytes.
    pub fn prepare(&mut self, slot: usize, needed: usize) -> &mut Vec<u8> {
        if self.buffers.len() <= slot {
            self.buffers.resize_with(slot + 1, Vec::new);
        }
        let factor = self.overallocation;
        let buf = &mut self.buffers[slot];
        buf.clear();
        if buf.capacity() < needed {
            let target = (needed as f64 * factor).ceil() as usize;
            buf.reserve_exact(target.max(needed));
            self.reallocations += 1;
        }
        buf
    }

    /// Contents of buffer `slot`.
    pub fn get(&self, slot: usize) -> &[u8] {
        self.buffers.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_avoids_regrowth() {
        let mut pool = BufferPool::new(1.5);
        assert!(pool.prepare(0, 100).capacity() >= 150);
        assert_eq!(pool.reallocations(), 1);
        // Growing within the slack keeps the allocation
        pool.prepare(0, 140).extend_from_slice(&[1, 2, 3]);
        assert_eq!(pool.reallocations(), 1);
        assert_eq!(pool.get(0), &[1, 2, 3]);
        pool.prepare(0, 400);
        assert_eq!(pool.reallocations(), 2);
        assert!(pool.get(0).is_empty());
    }

    #[test]
    fn test_factor_is_at_least_one() {
        assert_eq!(BufferPool::new(0.2).overallocation(), 1.0);
        assert_eq!(BufferPool::new(f64::NAN).overallocation(), 1.0);
        let mut pool = BufferPool::default();
        assert!(pool.prepare(3, 8).capacity() >= 8);
        assert!(pool.get(7).is_empty());
    }
}
