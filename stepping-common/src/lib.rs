pub mod config;
pub mod report;
pub mod sched_params;

// Re-export key types for easier use by dependent crates
pub use config::{EngineConfig, SchedulerConfig, TimingConfig, WorldConfig};
pub use report::{JobTiming, StepPath, StepReport};
pub use sched_params::{SchedParams, MAX_THREADS, MIN_THREADS};
