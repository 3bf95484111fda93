use anyhow::{Context, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One worker's assignment for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub worker: usize,
    /// First partition line.
    pub start: usize,
    /// Last partition line (inclusive), `start - 1` for an empty range.
    pub end: isize,
    /// Wall time of the job body, filled in by the worker.
    pub elapsed: Duration,
}

impl Job {
    pub fn new(worker: usize, start: usize, end: isize) -> Self {
        Self { worker, start, end, elapsed: Duration::ZERO }
    }
}

/// Body of a job, run on the worker thread with the job's range.
pub type Task = Box<dyn FnOnce(&Job) -> Result<()> + Send + 'static>;

/// A job as it was when its worker finished it.
#[derive(Debug, Clone)]
pub struct Finished {
    pub job: Job,
    /// Error chain or panic message when the task failed.
    pub failure: Option<String>,
}

/// Binary "idle" signal shared between a worker and the thread feeding it.
#[derive(Debug, Default)]
struct Completion {
    state: Mutex<CompletionState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
struct CompletionState {
    idle: bool,
    last: Option<Finished>,
}

impl Completion {
    /// Marks the worker idle, publishing the job it just finished if any.
    fn release(&self, finished: Option<Finished>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.idle = true;
        if finished.is_some() {
            state.last = finished;
        }
        self.cvar.notify_all();
    }

    /// Waits for the worker to become idle and claims it.
    fn acquire(&self) {
        let mut state = self.wait_idle();
        state.idle = false;
        state.last = None;
    }

    /// Waits for the worker to become idle without claiming it.
    fn peek(&self) -> Option<Finished> {
        self.wait_idle().last.clone()
    }

    fn wait_idle(&self) -> std::sync::MutexGuard<'_, CompletionState> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.cvar
            .wait_while(state, |state| !state.idle)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A persistent background thread with a single-slot job queue.
pub struct Worker {
    index: usize,
    sender: Option<SyncSender<(Job, Task)>>,
    completion: Arc<Completion>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(index: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(1);
        let completion = Arc::new(Completion::default());
        let handle = {
            let completion = Arc::clone(&completion);
            thread::Builder::new()
                .name(format!("stepping-worker-{}", index))
                .spawn(move || run_worker(index, receiver, completion))
                .with_context(|| format!("Failed to spawn worker thread {}", index))?
        };
        Ok(Self {
            index,
            sender: Some(sender),
            completion,
            handle: Some(handle),
        })
    }

    /// Hands `task` to the worker, blocking until it has finished its previous job.
    pub fn add_job(&self, job: Job, task: Task) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .with_context(|| format!("worker {} has been shut down", self.index))?;
        self.completion.acquire();
        if sender.send((job, task)).is_err() {
            // Nobody will pick the job up, don't leave waiters blocked on it.
            self.completion.release(None);
            anyhow::bail!("worker {} stopped receiving jobs", self.index);
        }
        Ok(())
    }

    /// Blocks until the worker is idle and returns its last finished job.
    ///
    /// Leaves the idle signal as it found it, so calling it repeatedly is harmless.
    pub fn wait_till_done(&self) -> Option<Finished> {
        self.completion.peek()
    }

    fn close(&mut self) {
        self.sender = None;
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Worker {} terminated abnormally.", self.index);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
        self.join();
    }
}

fn run_worker(index: usize, receiver: Receiver<(Job, Task)>, completion: Arc<Completion>) {
    log::trace!("Worker {} started.", index);
    completion.release(None);
    // A closed queue is the shutdown signal.
    while let Ok((mut job, task)) = receiver.recv() {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&job)));
        job.elapsed = started.elapsed();
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(reason) = &failure {
            log::warn!("Worker {} job {}..={} failed: {}", index, job.start, job.end, reason);
        }
        completion.release(Some(Finished { job, failure }));
    }
    log::trace!("Worker {} shutting down.", index);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

/// Fixed set of workers reused for every step.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Result<Self> {
        let workers = (0..thread_count)
            .map(Worker::spawn)
            .collect::<Result<Vec<_>>>()?;
        log::debug!("Started worker pool with {} threads.", thread_count);
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    pub fn add_job(&self, index: usize, job: Job, task: Task) -> Result<()> {
        self.workers[index].add_job(job, task)
    }

    pub fn wait_till_done(&self, index: usize) -> Option<Finished> {
        self.workers[index].wait_till_done()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close every queue first so the threads wind down together.
        for worker in &mut self.workers {
            worker.close();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        log::debug!("Stopped worker pool with {} threads.", self.workers.len());
    }
}
