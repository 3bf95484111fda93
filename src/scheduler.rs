use crate::partition::RangePartitioner;
use crate::pool::{Finished, Job, WorkerPool};
use crate::window_lock::LineLocks;
use crate::world::{retire, StepOutcome, StepWorld};
use anyhow::{Context, Result};
use dashmap::DashSet;
use log::{debug, trace, warn};
use stepping_common::{JobTiming, SchedParams, StepPath, StepReport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Entity counts gathered by every job of one step.
#[derive(Debug, Default)]
struct StepCounters {
    stepped: AtomicUsize,
    terminated: AtomicUsize,
}

/// Advances every entity of a [`StepWorld`] by one step, in parallel where the grid is
/// wide enough, and rebalances the per-worker line ranges from measured job times.
///
/// Owns everything that must outlive a single step: the worker pool, the range
/// partition (so adjustments accumulate) and the per-line lock set.
pub struct StepScheduler<W: StepWorld> {
    params: SchedParams,
    pool: Option<WorkerPool>,
    partitioner: RangePartitioner,
    locks: Arc<LineLocks>,
    processed: Arc<DashSet<W::Id>>,
}

impl<W: StepWorld> StepScheduler<W> {
    pub fn new(params: SchedParams) -> Self {
        Self {
            params,
            pool: None,
            partitioner: RangePartitioner::new(params.min_range_lines, params.imbalance_ratio),
            locks: Arc::new(LineLocks::default()),
            processed: Arc::new(DashSet::new()),
        }
    }

    pub fn params(&self) -> &SchedParams {
        &self.params
    }

    /// Changes the worker count (clamped to 1..=100). The pool is rebuilt at the start of
    /// the next parallel step.
    pub fn set_thread_count(&mut self, threads: u32) {
        let params = self.params.with_threads(threads);
        if params.threads != threads as usize {
            debug!("Requested {} threads, clamped to {}.", threads, params.threads);
        }
        self.params = params;
    }

    pub fn thread_count(&self) -> usize {
        self.params.threads
    }

    /// Current start line of every worker followed by the line count.
    pub fn boundaries(&self) -> &[usize] {
        self.partitioner.boundaries()
    }

    /// Advances every entity by exactly one step and returns once all of them are done.
    pub fn progress_all_entities(&mut self, world: &Arc<W>) -> Result<StepReport> {
        let started = Instant::now();
        let line_count = world.line_count();
        let thread_count = self.params.threads;
        let counters = Arc::new(StepCounters::default());

        // Too few lines per worker and the windows of non-adjacent workers would meet.
        let serial = thread_count <= 1 || thread_count * self.params.min_range_lines > line_count;
        let jobs = if serial {
            trace!("Serial step: {} threads over {} lines.", thread_count, line_count);
            self.run_serial(&**world, &counters)?;
            Vec::new()
        } else {
            self.run_parallel(world, thread_count, line_count, &counters)?
        };

        Ok(StepReport {
            path: if serial { StepPath::Serial } else { StepPath::Parallel },
            thread_count,
            line_count,
            jobs,
            stepped: counters.stepped.load(Ordering::Relaxed),
            terminated: counters.terminated.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        })
    }

    fn run_serial(&self, world: &W, counters: &StepCounters) -> Result<()> {
        for id in world.entities() {
            step_entity(world, id, counters)?;
        }
        Ok(())
    }

    fn run_parallel(
        &mut self,
        world: &Arc<W>,
        thread_count: usize,
        line_count: usize,
        counters: &Arc<StepCounters>,
    ) -> Result<Vec<JobTiming>> {
        self.processed.clear();
        self.provision(thread_count, line_count)?;
        let pool = self.pool.as_ref().context("worker pool missing after provisioning")?;

        let rows = world.max_row().map_or(0, |row| row + 1);
        let radius = self.params.window_radius as isize;

        let mut dispatch_error = None;
        for worker in 0..thread_count {
            let job = Job::new(worker, self.partitioner.start(worker), self.partitioner.end(worker));
            let world = Arc::clone(world);
            let locks = Arc::clone(&self.locks);
            let processed = Arc::clone(&self.processed);
            let counters = Arc::clone(counters);
            let dispatched = pool.add_job(
                worker,
                job,
                Box::new(move |job| {
                    process_lines(&*world, &locks, &processed, &counters, job, radius, rows)
                }),
            );
            if let Err(e) = dispatched {
                dispatch_error = Some(e);
                break;
            }
        }

        // Barrier: every dispatched job has finished before anything is inspected.
        let finished: Vec<Option<Finished>> =
            (0..thread_count).map(|worker| pool.wait_till_done(worker)).collect();
        if let Some(e) = dispatch_error {
            return Err(e.context("Failed to dispatch step jobs"));
        }

        let mut jobs = Vec::with_capacity(thread_count);
        let mut failures = Vec::new();
        for (worker, finished) in finished.into_iter().enumerate() {
            let finished = finished
                .with_context(|| format!("worker {} finished without reporting its job", worker))?;
            if let Some(reason) = finished.failure {
                failures.push(format!("worker {}: {}", worker, reason));
            }
            let job = finished.job;
            jobs.push(JobTiming { worker, start: job.start, end: job.end, elapsed: job.elapsed });
        }
        if !failures.is_empty() {
            warn!("{} of {} step jobs failed.", failures.len(), thread_count);
            anyhow::bail!("Step failed: {}", failures.join("; "));
        }

        self.rebalance(&jobs);
        Ok(jobs)
    }

    /// Brings pool, partition and lock set in line with the current shape.
    /// Each part is left untouched when its shape has not changed.
    fn provision(&mut self, thread_count: usize, line_count: usize) -> Result<()> {
        let pool_size = self.pool.as_ref().map(WorkerPool::len);
        if pool_size != Some(thread_count) {
            if let Some(previous) = pool_size {
                debug!("Thread count changed from {} to {}, rebuilding worker pool.", previous, thread_count);
            }
            // Old workers are shut down and joined before new ones start.
            self.pool = None;
            self.pool = Some(WorkerPool::new(thread_count)?);
        }

        self.partitioner.initialize(thread_count, line_count);

        if self.locks.line_count() != line_count {
            match Arc::get_mut(&mut self.locks) {
                Some(locks) => locks.initialize(line_count),
                None => self.locks = Arc::new(LineLocks::new(line_count)),
            }
        }
        Ok(())
    }

    fn rebalance(&mut self, jobs: &[JobTiming]) {
        let fastest = jobs.iter().min_by_key(|job| job.elapsed);
        let slowest = jobs.iter().max_by_key(|job| job.elapsed);
        let (Some(fastest), Some(slowest)) = (fastest, slowest) else {
            return;
        };
        let moved = self.partitioner.adjust(
            fastest.worker,
            nanos(fastest),
            slowest.worker,
            nanos(slowest),
        );
        trace!(
            "Fastest worker {} ({:?}), slowest worker {} ({:?}), boundaries {}: {:?}",
            fastest.worker,
            fastest.elapsed,
            slowest.worker,
            slowest.elapsed,
            if moved { "moved" } else { "kept" },
            self.partitioner.boundaries()
        );
    }
}

fn nanos(job: &JobTiming) -> u64 {
    u64::try_from(job.elapsed.as_nanos()).unwrap_or(u64::MAX)
}

fn step_entity<W: StepWorld>(world: &W, id: W::Id, counters: &StepCounters) -> Result<()> {
    counters.stepped.fetch_add(1, Ordering::Relaxed);
    if world.step(id)? == StepOutcome::Terminate {
        retire(world, id);
        counters.terminated.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Body of one parallel job: walks the job's lines in ascending order behind a sliding
/// window of locked lines, stepping every entity not yet seen this step.
fn process_lines<W: StepWorld>(
    world: &W,
    locks: &LineLocks,
    processed: &DashSet<W::Id>,
    counters: &StepCounters,
    job: &Job,
    radius: isize,
    rows: usize,
) -> Result<()> {
    let start = job.start as isize;
    // Dropping the window on an early return releases whatever it still holds.
    let mut window = locks.window();
    window.lock_range(start - radius, start + radius);

    for line in start..=job.end {
        for row in 0..rows {
            for id in world.bucket(line as usize, row) {
                // Entities that moved ahead of the cursor show up again; step them once.
                if !processed.insert(id) {
                    continue;
                }
                step_entity(world, id, counters)?;
            }
        }
        window.unlock(line - radius);
        window.lock(line + radius + 1);
    }

    window.unlock_range(job.end + 1 - radius, job.end + 1 + radius);
    Ok(())
}
