use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, trace};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use stepping_common::{EngineConfig, StepPath};
use stepping_engine::{StepScheduler, WalkerWorld};

/// Command-line arguments for the stepping engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config.toml file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured worker thread count (clamped to 1..=100)
    #[arg(short, long)]
    threads: Option<u32>,

    /// Override the configured number of steps
    #[arg(short, long)]
    steps: Option<u32>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Stepping Engine...");

    // --- Load Configuration ---
    let mut config = EngineConfig::load(&args.config)?;
    if let Some(threads) = args.threads {
        config.scheduler.threads = threads;
    }
    if let Some(steps) = args.steps {
        config.timing.steps = steps;
    }
    let params = config.sched_params();
    debug!("Scheduler Parameters: {:#?}", params);

    // --- Initialize World ---
    let world = Arc::new(WalkerWorld::from_config(&config.world).context("Failed to build world")?);
    let mut scheduler = StepScheduler::new(params);
    info!(
        "Stepping {} walkers with {} threads (window radius {}, min range {} lines).",
        world.len(),
        scheduler.thread_count(),
        params.window_radius,
        params.min_range_lines
    );

    // --- Step Loop ---
    let total_steps = config.timing.steps;
    let report_interval = config.timing.report_interval_steps.max(1);
    let start_time = Instant::now();
    let mut parallel_steps = 0u32;

    for step in 0..total_steps {
        let report = scheduler
            .progress_all_entities(&world)
            .with_context(|| format!("Step {} failed", step + 1))?;
        world.advance_tick();
        if report.path == StepPath::Parallel {
            parallel_steps += 1;
        }

        let is_report_step = (step + 1) % report_interval == 0;
        let is_last_step = step + 1 == total_steps;
        if is_report_step || is_last_step {
            info!(
                "Step [{}/{}] {:?} | Walkers: {} | Lines: {} | Stepped: {} | Terminated: {} | Step Time: {:6.2} ms | Imbalance: {:.2}",
                step + 1,
                total_steps,
                report.path,
                world.len(),
                report.line_count,
                report.stepped,
                report.terminated,
                report.elapsed.as_secs_f64() * 1000.0,
                report.imbalance()
            );
            debug!("Boundaries: {:?}", scheduler.boundaries());
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                report.elapsed.as_secs_f64() * 1000.0
            );
        }

        if world.is_empty() {
            info!("All walkers terminated after {} steps.", step + 1);
            break;
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Finished in {:.3} seconds ({} parallel steps, {} walkers left).",
        total_duration.as_secs_f64(),
        parallel_steps,
        world.len()
    );
    Ok(())
}
