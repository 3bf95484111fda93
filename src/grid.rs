use rayon::prelude::*;
use std::sync::{Mutex, MutexGuard, PoisonError};

// Calculates the 1D bucket index for a grid position
#[inline(always)]
pub fn cell_index(x: usize, y: usize, width: usize) -> usize {
    y * width + x
}

/// Fixed-size 2-D grid of entity buckets, stored row-major.
///
/// Each bucket has its own mutex so the grid is `Sync`; keeping multi-bucket updates
/// consistent is left to the caller (the scheduler's line locks).
#[derive(Debug)]
pub struct BucketGrid<Id> {
    width: usize,
    height: usize,
    buckets: Vec<Mutex<Vec<Id>>>,
}

impl<Id: Copy + PartialEq + Send> BucketGrid<Id> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buckets: (0..width * height).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    fn bucket(&self, x: usize, y: usize) -> Option<MutexGuard<'_, Vec<Id>>> {
        if !self.contains(x, y) {
            return None;
        }
        let bucket = &self.buckets[cell_index(x, y, self.width)];
        Some(bucket.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Adds `id` to bucket `(x, y)`. Returns `false` if the position is off the grid.
    pub fn insert(&self, x: usize, y: usize, id: Id) -> bool {
        match self.bucket(x, y) {
            Some(mut bucket) => {
                bucket.push(id);
                true
            }
            None => false,
        }
    }

    /// Removes `id` from bucket `(x, y)`. Returns whether it was there.
    pub fn remove(&self, x: usize, y: usize, id: Id) -> bool {
        let Some(mut bucket) = self.bucket(x, y) else {
            return false;
        };
        match bucket.iter().position(|held| *held == id) {
            Some(at) => {
                bucket.swap_remove(at);
                true
            }
            None => false,
        }
    }

    /// Moves `id` between buckets. Only one bucket is locked at a time.
    pub fn relocate(&self, from: (usize, usize), to: (usize, usize), id: Id) -> bool {
        if from == to {
            return true;
        }
        self.remove(from.0, from.1, id) && self.insert(to.0, to.1, id)
    }

    /// Copy of the ids in bucket `(x, y)`, empty when off the grid.
    pub fn snapshot(&self, x: usize, y: usize) -> Vec<Id> {
        self.bucket(x, y).map(|bucket| bucket.clone()).unwrap_or_default()
    }

    /// Highest column with a non-empty bucket.
    pub fn max_column(&self) -> Option<usize> {
        let width = self.width;
        self.occupied_cells().map(|idx| idx % width).max()
    }

    /// Highest row with a non-empty bucket.
    pub fn max_row(&self) -> Option<usize> {
        let width = self.width;
        self.occupied_cells().map(|idx| idx / width).max()
    }

    /// Total number of ids stored across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .par_iter()
            .map(|bucket| bucket.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn occupied_cells(&self) -> impl ParallelIterator<Item = usize> + '_ {
        self.buckets
            .par_iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.lock().unwrap_or_else(PoisonError::into_inner).is_empty())
            .map(|(idx, _)| idx)
    }
}
