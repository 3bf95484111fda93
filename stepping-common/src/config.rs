use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sched_params::SchedParams;
use std::path::Path;

// Worker pool and rebalancing settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SchedulerConfig {
    pub threads: u32,
    #[serde(default = "default_min_range_lines")]
    pub min_range_lines: u32,
    #[serde(default = "default_imbalance_ratio")]
    pub imbalance_ratio: f64,
}

// Reference bucket grid and its random walkers
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorldConfig {
    pub width: u32,
    pub height: u32,
    pub walkers: u32,
    #[serde(default = "default_initial_energy")]
    pub initial_energy: u32,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub steps: u32,
    #[serde(default = "default_report_interval_steps")]
    pub report_interval_steps: u32,
}

// Main engine configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub world: WorldConfig,
    pub timing: TimingConfig,
}

fn default_min_range_lines() -> u32 {
    5
}

fn default_imbalance_ratio() -> f64 {
    1.1 // Ignore imbalances below 10%
}

fn default_initial_energy() -> u32 {
    100
}

fn default_report_interval_steps() -> u32 {
    10
}

impl EngineConfig {
    /// Loads the engine configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {:#}", path_ref.display(), e))
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.world.width == 0 || self.world.height == 0 {
            anyhow::bail!("world width and height must be greater than 0.");
        }
        if self.scheduler.min_range_lines == 0 {
            anyhow::bail!("min_range_lines must be greater than 0.");
        }
        let ratio = self.scheduler.imbalance_ratio;
        if ratio.is_nan() || ratio < 1.0 {
            anyhow::bail!(
                "imbalance_ratio must be at least 1.0 (got {}).",
                ratio
            );
        }
        if self.timing.steps == 0 {
            anyhow::bail!("steps must be greater than 0.");
        }
        // threads is clamped rather than rejected, see SchedParams.
        Ok(())
    }

    /// Converts the configuration into the parameters the scheduler reads every step.
    pub fn sched_params(&self) -> SchedParams {
        SchedParams::new(
            self.scheduler.threads,
            self.scheduler.min_range_lines,
            self.scheduler.imbalance_ratio,
        )
    }
}
