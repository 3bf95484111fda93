use serde::{Deserialize, Serialize};

/// Lower bound applied to the configured thread count.
pub const MIN_THREADS: usize = 1;
/// Upper bound applied to the configured thread count.
pub const MAX_THREADS: usize = 100;

/// Scheduler parameters derived from the configuration, read on every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedParams {
    /// Worker count, already clamped to `[MIN_THREADS, MAX_THREADS]`.
    pub threads: usize,
    /// Smallest range (in partition lines) the rebalancer may leave a worker with.
    pub min_range_lines: usize,
    /// Lines kept locked on each side of a worker's cursor (`min_range_lines - 1`).
    pub window_radius: usize,
    /// Slowest/fastest job time ratio below which no rebalancing happens.
    pub imbalance_ratio: f64,
}

impl SchedParams {
    pub fn new(threads: u32, min_range_lines: u32, imbalance_ratio: f64) -> Self {
        let min_range_lines = (min_range_lines as usize).max(1);
        Self {
            threads: clamp_threads(threads),
            min_range_lines,
            window_radius: min_range_lines - 1,
            imbalance_ratio,
        }
    }

    /// Returns a copy with a different (clamped) thread count.
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = clamp_threads(threads);
        self
    }
}

impl Default for SchedParams {
    fn default() -> Self {
        Self::new(4, 5, 1.1)
    }
}

#[inline]
pub fn clamp_threads(threads: u32) -> usize {
    (threads as usize).clamp(MIN_THREADS, MAX_THREADS)
}
