use std::ops::Range;

/// Splits the partition lines `[0, line_count)` into one contiguous range per worker
/// and nudges the split between steps toward whichever worker ran slowest.
///
/// `table[i]` is the first line of worker `i`; `table[thread_count]` is a sentinel equal
/// to `line_count`, so the end of every range is simply `table[i + 1] - 1`.
#[derive(Debug, Clone)]
pub struct RangePartitioner {
    table: Vec<usize>,
    min_range_lines: usize,
    imbalance_ratio: f64,
}

impl RangePartitioner {
    pub fn new(min_range_lines: usize, imbalance_ratio: f64) -> Self {
        Self {
            table: Vec::new(),
            min_range_lines,
            imbalance_ratio,
        }
    }

    /// Rebuilds the table with an even split, unless it already has this shape.
    ///
    /// Keeping the table when the shape is unchanged is what lets `adjust` accumulate
    /// across steps.
    pub fn initialize(&mut self, thread_count: usize, line_count: usize) {
        if self.thread_count() == thread_count && self.line_count() == line_count {
            return;
        }
        let thread_count = thread_count.max(1);
        self.table = (0..=thread_count)
            .map(|i| line_count * i / thread_count)
            .collect();
        log::debug!(
            "Partition reset for {} threads over {} lines: {:?}",
            thread_count,
            line_count,
            self.table
        );
    }

    pub fn thread_count(&self) -> usize {
        self.table.len().saturating_sub(1)
    }

    pub fn line_count(&self) -> usize {
        self.table.last().copied().unwrap_or(0)
    }

    #[inline]
    pub fn start(&self, worker: usize) -> usize {
        self.table[worker]
    }

    /// Last line of the worker's range, `start - 1` when the range is empty.
    #[inline]
    pub fn end(&self, worker: usize) -> isize {
        self.table[worker + 1] as isize - 1
    }

    /// The worker's range as a half-open line range.
    #[inline]
    pub fn lines(&self, worker: usize) -> Range<usize> {
        self.table[worker]..self.table[worker + 1]
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.table
    }

    /// Moves one line of work from the slowest worker toward the fastest one.
    ///
    /// Every boundary between the two workers shifts by one line toward the slow side,
    /// starting next to the slow worker, but only where the range being shrunk keeps at
    /// least `min_range_lines` lines. Returns whether any boundary moved.
    pub fn adjust(
        &mut self,
        shortest_idx: usize,
        shortest_nanos: u64,
        longest_idx: usize,
        longest_nanos: u64,
    ) -> bool {
        if shortest_idx == longest_idx {
            return false;
        }
        if (longest_nanos as f64) < shortest_nanos as f64 * self.imbalance_ratio {
            return false;
        }
        let threads = self.thread_count();
        if shortest_idx >= threads || longest_idx >= threads {
            return false;
        }

        let mut moved = false;
        if longest_idx < shortest_idx {
            // Slow worker on the left: boundaries move left, each shrinking its left range.
            for k in longest_idx + 1..=shortest_idx {
                if self.table[k] > self.table[k - 1]
                    && self.table[k] - 1 - self.table[k - 1] >= self.min_range_lines
                {
                    self.table[k] -= 1;
                    moved = true;
                }
            }
        } else {
            // Slow worker on the right: boundaries move right, each shrinking its right range.
            for k in (shortest_idx + 1..=longest_idx).rev() {
                if self.table[k + 1] > self.table[k]
                    && self.table[k + 1] - (self.table[k] + 1) >= self.min_range_lines
                {
                    self.table[k] += 1;
                    moved = true;
                }
            }
        }
        moved
    }
}
