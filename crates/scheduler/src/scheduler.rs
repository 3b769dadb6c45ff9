//! Job scheduler implementation
//!
//! Thread-safe front for the priority queue: submission, blocking pickup by
//! workers and cooperative cancellation.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobKind, JobPriority, JobTask, PriorityQueue};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct SchedulerState {
    queue: PriorityQueue,
    closed: bool,
}

/// Job scheduler with priority queue
///
/// Jobs are executed in priority order. Every job gets a cancellation token;
/// queued jobs are dropped on cancellation, running jobs observe the token.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    available: Condvar,
    cancellation: CancellationRegistry<JobId>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: PriorityQueue::new(),
                closed: false,
            }),
            available: Condvar::new(),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Queue a job and return its id and cancellation token.
    pub fn submit(
        &self,
        priority: JobPriority,
        kind: JobKind,
        task: JobTask,
    ) -> (JobId, CancellationToken) {
        let mut state = self.state.lock().unwrap();
        let job_id = state.queue.push(priority, kind, task);
        let token = self.cancellation.register(job_id);
        drop(state);

        self.available.notify_one();
        (job_id, token)
    }

    /// Wait up to `timeout` for a job. Returns `None` on timeout or once the
    /// scheduler is closed.
    pub fn next_job_timeout(&self, timeout: Duration) -> Option<(Job, CancellationToken)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.queue.pop() {
                drop(state);
                let token = self.cancellation.get(&job.id).unwrap_or_default();
                return Some((job, token));
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.available.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Drop a finished job's token.
    pub fn complete_job(&self, job_id: JobId) {
        self.cancellation.unregister(&job_id);
    }

    /// Drop every queued job and cancel every running one.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let removed = state.queue.remove_if(|_| true);
        drop(state);

        self.cancellation.cancel_all();
        removed.len()
    }

    /// Stop handing out jobs and wake every waiting worker.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn pending_jobs(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn noop() -> JobTask {
        Box::new(|_| {})
    }

    fn render(page_index: u32) -> JobKind {
        JobKind::RenderPage { page_index }
    }

    fn next(scheduler: &JobScheduler) -> Option<(Job, CancellationToken)> {
        scheduler.next_job_timeout(Duration::ZERO)
    }

    #[test]
    fn test_scheduler_basic() {
        let scheduler = JobScheduler::new();
        let (job_id, token) = scheduler.submit(JobPriority::Visible, render(0), noop());

        assert!(!token.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 1);

        let (job, running) = next(&scheduler).expect("job should be queued");
        assert_eq!(job.id, job_id);
        assert_eq!(scheduler.pending_jobs(), 0);

        scheduler.complete_job(job.id);
        scheduler.cancel_all();
        assert!(!running.is_cancelled());
    }

    #[test]
    fn test_scheduler_priority_ordering() {
        let scheduler = JobScheduler::new();
        scheduler.submit(JobPriority::Thumbnail, JobKind::Thumbnail { page_index: 0 }, noop());
        scheduler.submit(JobPriority::Preload, render(5), noop());
        scheduler.submit(JobPriority::Visible, render(1), noop());

        let kinds: Vec<JobKind> =
            std::iter::from_fn(|| next(&scheduler)).map(|(job, _)| job.kind).collect();
        assert_eq!(kinds, vec![render(1), render(5), JobKind::Thumbnail { page_index: 0 }]);
    }

    #[test]
    fn test_cancel_all() {
        let scheduler = JobScheduler::new();
        scheduler.submit(JobPriority::Preload, render(0), noop());
        let (_, queued) = scheduler.submit(JobPriority::Preload, render(1), noop());
        let (_, running) = next(&scheduler).expect("job should be queued");

        assert_eq!(scheduler.cancel_all(), 1);
        assert!(running.is_cancelled());
        assert!(queued.is_cancelled());
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn test_next_job_timeout_wakes_on_submit() {
        let scheduler = Arc::new(JobScheduler::new());
        let waiter = scheduler.clone();

        let handle = thread::spawn(move || {
            waiter.next_job_timeout(Duration::from_secs(5)).map(|(job, _)| job.kind)
        });
        thread::sleep(Duration::from_millis(20));
        scheduler.submit(JobPriority::Visible, render(7), noop());

        assert_eq!(handle.join().unwrap(), Some(render(7)));
    }

    #[test]
    fn test_next_job_timeout_expires() {
        let scheduler = JobScheduler::new();
        let started = Instant::now();

        assert!(scheduler.next_job_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_releases_waiters() {
        let scheduler = Arc::new(JobScheduler::new());
        let waiter = scheduler.clone();

        let handle = thread::spawn(move || waiter.next_job_timeout(Duration::from_secs(10)).is_none());
        thread::sleep(Duration::from_millis(20));
        scheduler.close();

        assert!(handle.join().unwrap());
        assert!(scheduler.is_closed());
    }
}
