//! Priority-based job queue
//!
//! Jobs are popped by priority (highest first), then by insertion order
//! within the same priority.

use crate::cancel::CancellationToken;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// Job priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Thumbnail generation (lowest priority)
    Thumbnail = 0,

    /// Pages in the preload window around the viewport
    Preload = 1,

    /// Pages currently on screen
    Visible = 2,
}

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    RenderPage { page_index: u32 },
    Thumbnail { page_index: u32 },
}

impl JobKind {
    pub fn page_index(&self) -> u32 {
        match *self {
            JobKind::RenderPage { page_index } | JobKind::Thumbnail { page_index } => page_index,
        }
    }
}

/// Work executed on a worker thread. The token is the job's own
/// cancellation token.
pub type JobTask = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

pub struct Job {
    pub id: JobId,
    pub priority: JobPriority,
    pub kind: JobKind,
    pub(crate) task: JobTask,
    insertion_order: u64,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        priority: JobPriority,
        kind: JobKind,
        task: JobTask,
        insertion_order: u64,
    ) -> Self {
        Self { id, priority, kind, task, insertion_order }
    }

    /// Consume the job and run its task.
    pub fn run(self, token: &CancellationToken) {
        (self.task)(token)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: earlier insertion must compare greater.
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Max-heap of jobs. Not synchronized; the scheduler owns it behind its
/// mutex.
pub(crate) struct PriorityQueue {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub(crate) fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_job_id: 1, insertion_counter: 0 }
    }

    pub(crate) fn push(&mut self, priority: JobPriority, kind: JobKind, task: JobTask) -> JobId {
        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;

        self.heap.push(Job::new(job_id, priority, kind, task, insertion_order));
        job_id
    }

    pub(crate) fn pop(&mut self) -> Option<Job> {
        self.heap.pop()
    }

    /// Remove and return every queued job matching `predicate`.
    pub(crate) fn remove_if<F>(&mut self, mut predicate: F) -> Vec<Job>
    where
        F: FnMut(&Job) -> bool,
    {
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut self.heap).into_iter().partition(|job| predicate(job));
        self.heap = kept.into_iter().collect();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
