//! Adaptive thread-pooled stepping of entities on a column-partitioned bucket grid.
//!
//! [`StepScheduler`] advances every entity of a [`StepWorld`] by one step per call. Wide
//! grids are split into one contiguous column range per worker; each worker holds a small
//! window of column locks around its cursor so neighbouring workers never touch the same
//! columns at once, and the ranges are rebalanced after every step from measured job times.

pub mod grid;
pub mod partition;
pub mod pool;
pub mod scheduler;
pub mod walker;
pub mod window_lock;
pub mod world;

pub use partition::RangePartitioner;
pub use pool::{Finished, Job, Task, Worker, WorkerPool};
pub use scheduler::StepScheduler;
pub use walker::{Walker, WalkerId, WalkerWorld};
pub use window_lock::{LineLocks, Window};
pub use world::{StepOutcome, StepWorld};
