//! Worker pool for parallel job execution.
//!
//! Named worker threads pull jobs from a shared [`JobScheduler`], skip jobs
//! cancelled before they start, and keep running if a job panics.

use crate::JobScheduler;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker will wait for a job before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: num_cpus(), poll_interval: Duration::from_millis(100) }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers: num_workers.max(1), poll_interval: Duration::from_millis(100) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Fixed-size pool of worker threads.
///
/// Dropping the pool signals shutdown without waiting; [`shutdown`](Self::shutdown)
/// also joins the threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    scheduler: Arc<JobScheduler>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads named `{name}-{id}`.
    pub fn new(name: &str, scheduler: Arc<JobScheduler>, config: WorkerPoolConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = (0..config.num_workers)
            .map(|id| {
                Worker::new(
                    format!("{name}-{id}"),
                    scheduler.clone(),
                    shutdown.clone(),
                    config.poll_interval,
                )
            })
            .collect();

        Self { workers, shutdown, scheduler }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal all workers to stop and wait for their current jobs to finish.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.close();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutting_down() {
            self.signal_shutdown();
        }
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(
        name: String,
        scheduler: Arc<JobScheduler>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(scheduler, shutdown, poll_interval))
            .expect("Failed to spawn worker thread");

        Self { thread: Some(thread) }
    }

    fn run(scheduler: Arc<JobScheduler>, shutdown: Arc<AtomicBool>, poll_interval: Duration) {
        while !shutdown.load(Ordering::Acquire) {
            let Some((job, token)) = scheduler.next_job_timeout(poll_interval) else {
                continue;
            };
            let job_id = job.id;
            let kind = job.kind;

            if token.is_cancelled() {
                debug!("skipping cancelled job {job_id} ({kind:?})");
            } else if panic::catch_unwind(AssertUnwindSafe(|| job.run(&token))).is_err() {
                error!("job {job_id} ({kind:?}) panicked");
            }

            scheduler.complete_job(job_id);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
