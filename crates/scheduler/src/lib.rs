//! PDF Viewer Scheduler Library
//!
//! Job scheduler with priority queue and cancellable workers.
//!
//! Page renders, thumbnails and metadata lookups are submitted as jobs
//! carrying their own task closure. Jobs run in priority order (visible
//! pages, then preload, then thumbnails) with FIFO ordering within each
//! level, on named worker threads that skip cancelled work.
//!
//! # Example
//!
//! ```
//! use pdf_viewer_scheduler::{JobKind, JobPriority, JobScheduler, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(JobScheduler::new());
//! let pool = WorkerPool::new("pdf-render-worker", scheduler.clone(), WorkerPoolConfig::new(2));
//!
//! let (_job_id, token) = scheduler.submit(
//!     JobPriority::Visible,
//!     JobKind::RenderPage { page_index: 0 },
//!     Box::new(|token| {
//!         if token.is_cancelled() {
//!             return;
//!         }
//!         // ... rasterize page 0 ...
//!     }),
//! );
//!
//! // Navigating away from the document cancels the job cooperatively.
//! token.cancel();
//! pool.shutdown();
//! ```

mod cancel;
mod debounce;
mod priority;
mod scheduler;
mod window;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken, Generation, GenerationCounter};
pub use debounce::Debouncer;
pub use priority::{Job, JobId, JobKind, JobPriority, JobTask};
pub use scheduler::JobScheduler;
pub use window::{preload_window, render_order};
pub use worker::{WorkerPool, WorkerPoolConfig};
