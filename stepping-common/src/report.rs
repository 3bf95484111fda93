use serde::{Serialize, Deserialize};
use std::time::Duration;

/// Which execution path a step took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPath {
    Serial,
    Parallel,
}

/// Range and measured wall time of one worker's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTiming {
    pub worker: usize,
    /// First partition line of the job.
    pub start: usize,
    /// Last partition line of the job (inclusive). `start - 1` for an empty range.
    pub end: isize,
    pub elapsed: Duration,
}

impl JobTiming {
    /// Number of lines the job covered.
    pub fn lines(&self) -> usize {
        (self.end + 1 - self.start as isize).max(0) as usize
    }
}

/// Summary of a single call to advance every entity by one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub path: StepPath,
    pub thread_count: usize,
    pub line_count: usize,
    /// One entry per worker, empty for the serial path.
    pub jobs: Vec<JobTiming>,
    /// Entities whose step hook ran during this step.
    pub stepped: usize,
    /// Entities removed because their hook reported termination.
    pub terminated: usize,
    pub elapsed: Duration,
}

impl StepReport {
    pub fn fastest(&self) -> Option<&JobTiming> {
        self.jobs.iter().min_by_key(|job| job.elapsed)
    }

    pub fn slowest(&self) -> Option<&JobTiming> {
        self.jobs.iter().max_by_key(|job| job.elapsed)
    }

    /// Slowest over fastest job time, `1.0` when there is nothing to compare.
    pub fn imbalance(&self) -> f64 {
        match (self.fastest(), self.slowest()) {
            (Some(fast), Some(slow)) if !fast.elapsed.is_zero() => {
                slow.elapsed.as_secs_f64() / fast.elapsed.as_secs_f64()
            }
            _ => 1.0,
        }
    }
}
