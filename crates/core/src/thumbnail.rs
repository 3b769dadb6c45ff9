//! Thumbnail generation on its own bounded worker pool.

use crate::document::DocumentHandle;
use crate::error::ViewerError;
use crate::events::{EventGate, ViewerEvent};
use crate::metadata::PageMetadataStore;
use crate::source::file_uri;
use log::{debug, warn};
use pdf_engine::{PdfEngineError, RenderRequest};
use pdf_viewer_cache::{BitmapCache, ThumbnailStore};
use pdf_viewer_scheduler::{
    CancellationRegistry, CancellationToken, JobKind, JobPriority, JobScheduler, WorkerPool,
    WorkerPoolConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailSettings {
    pub width: u32,
    pub quality: u8,
    pub concurrency: usize,
    pub batch_delay: Duration,
}

/// What [`ThumbnailPipeline::generate`] did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailRequest {
    /// Served from the store; the event has already been emitted.
    Cached(PathBuf),
    Queued,
    /// Dropped, an earlier request for the page is still running.
    AlreadyPending,
}

struct ThumbnailShared {
    store: ThumbnailStore,
    bitmaps: BitmapCache,
    scale: AtomicU32,
    pending: CancellationRegistry<u32>,
    gate: Arc<EventGate>,
    metadata: PageMetadataStore,
    settings: ThumbnailSettings,
    scheduler: Arc<JobScheduler>,
    document: Mutex<Option<Arc<DocumentHandle>>>,
    batch: Mutex<Option<CancellationToken>>,
}

impl ThumbnailShared {
    fn request(self: &Arc<Self>, document: &Arc<DocumentHandle>, page_index: u32) -> ThumbnailRequest {
        let Some(token) = self.pending.register_if_absent(page_index) else {
            return ThumbnailRequest::AlreadyPending;
        };

        if let Some(path) = self.store.lookup(document.document_hash(), page_index) {
            self.gate.emit(
                document.generation(),
                ViewerEvent::ThumbnailGenerated { page: page_index, uri: file_uri(&path) },
            );
            self.pending.unregister_if(&page_index, &token);
            return ThumbnailRequest::Cached(path);
        }

        let shared = self.clone();
        let document = document.clone();
        self.scheduler.submit(
            JobPriority::Thumbnail,
            JobKind::Thumbnail { page_index },
            Box::new(move |job_token| {
                if !job_token.is_cancelled() {
                    shared.generate_now(&document, page_index, &token);
                }
                shared.pending.unregister_if(&page_index, &token);
            }),
        );
        ThumbnailRequest::Queued
    }

    fn scale(&self) -> f32 {
        f32::from_bits(self.scale.load(Ordering::Acquire))
    }

    fn generate_now(&self, document: &DocumentHandle, page_index: u32, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }

        let size = self.metadata.dimensions(document, page_index);
        let width_px = self.settings.width;
        let aspect = size.aspect();
        let height_px = if aspect > 0.0 && aspect.is_finite() {
            ((width_px as f32 / aspect).round() as u32).max(1)
        } else {
            width_px
        };

        let rendered = document.render(RenderRequest { page_index, width_px, height_px });
        if token.is_cancelled() {
            debug!("thumbnail for page {page_index} cancelled");
            return;
        }
        let generation = document.generation();

        let image = match rendered {
            Ok(image) => image,
            Err(PdfEngineError::OutOfMemory { width_px, height_px }) => {
                let scale = self.scale();
                warn!("out of memory rendering thumbnail {page_index} at {width_px}x{height_px}, evicting bitmap cache");
                self.gate.commit_and_emit(
                    generation,
                    || self.bitmaps.evict_all(),
                    |_| Some(ViewerEvent::error(&ViewerError::OutOfMemory { scale })),
                );
                return;
            }
            Err(err) => {
                warn!("rendering thumbnail for page {page_index} failed: {err}");
                self.gate.emit(generation, ViewerEvent::error(&ViewerError::from(err)));
                return;
            }
        };

        let saved =
            self.store.save(document.document_hash(), page_index, &image, self.settings.quality);
        let event = match saved {
            Ok(path) => ViewerEvent::ThumbnailGenerated { page: page_index, uri: file_uri(&path) },
            Err(err) => {
                warn!("saving thumbnail for page {page_index} failed: {err}");
                ViewerEvent::error(&ViewerError::ThumbnailSaveFailed(err.to_string()))
            }
        };
        self.gate.emit(generation, event);
    }
}

/// Generates, persists and reports page thumbnails.
///
/// Requests for a page that is already being generated are dropped, so
/// duplicate requests rasterize once and emit one event.
pub struct ThumbnailPipeline {
    shared: Arc<ThumbnailShared>,
    pool: Option<WorkerPool>,
}

impl ThumbnailPipeline {
    /// `bitmaps` is the page cache to clear when a thumbnail runs out of
    /// memory.
    pub fn new(
        store: ThumbnailStore,
        bitmaps: BitmapCache,
        gate: Arc<EventGate>,
        metadata: PageMetadataStore,
        settings: ThumbnailSettings,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new());
        let pool = WorkerPool::new(
            "pdf-thumbnail-worker",
            scheduler.clone(),
            WorkerPoolConfig::new(settings.concurrency),
        );
        let shared = Arc::new(ThumbnailShared {
            store,
            bitmaps,
            scale: AtomicU32::new(1.0f32.to_bits()),
            pending: CancellationRegistry::new(),
            gate,
            metadata,
            settings,
            scheduler,
            document: Mutex::new(None),
            batch: Mutex::new(None),
        });

        Self { shared, pool: Some(pool) }
    }

    pub fn store(&self) -> &ThumbnailStore {
        &self.shared.store
    }

    pub fn attach(&self, document: Arc<DocumentHandle>) {
        *self.shared.document.lock().unwrap() = Some(document);
    }

    /// View scale named by out-of-memory errors.
    pub fn set_scale(&self, scale: f32) {
        self.shared.scale.store(scale.to_bits(), Ordering::Release);
    }

    pub fn reset(&self) {
        if let Some(batch) = self.shared.batch.lock().unwrap().take() {
            batch.cancel();
        }
        self.shared.pending.cancel_all();
        self.shared.scheduler.cancel_all();
        self.shared.document.lock().unwrap().take();
    }

    pub fn generate(&self, page_index: i64) -> Result<ThumbnailRequest, ViewerError> {
        let document = self.document().ok_or(ViewerError::NotLoaded)?;
        let page_count = document.page_count();
        let page = u32::try_from(page_index)
            .ok()
            .filter(|page| *page < page_count)
            .ok_or(ViewerError::InvalidPageIndex { index: page_index, page_count })?;

        Ok(self.shared.request(&document, page))
    }

    /// Request every page in order on a background thread, pausing between
    /// pages. A newer batch or a reset stops the previous one.
    pub fn generate_all(&self) -> Result<(), ViewerError> {
        let document = self.document().ok_or(ViewerError::NotLoaded)?;

        let token = CancellationToken::new();
        if let Some(previous) = self.shared.batch.lock().unwrap().replace(token.clone()) {
            previous.cancel();
        }

        let shared = self.shared.clone();
        thread::Builder::new()
            .name("pdf-thumbnail-batch".to_owned())
            .spawn(move || {
                let generation = document.generation();
                for page_index in 0..document.page_count() {
                    if token.is_cancelled() || !shared.gate.is_current(generation) {
                        debug!("thumbnail batch stopped at page {page_index}");
                        return;
                    }
                    shared.request(&document, page_index);
                    if !shared.settings.batch_delay.is_zero() {
                        thread::sleep(shared.settings.batch_delay);
                    }
                }
            })
            .expect("Failed to spawn thumbnail batch thread");

        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn shutdown(&mut self) {
        self.reset();
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    fn document(&self) -> Option<Arc<DocumentHandle>> {
        self.shared.document.lock().unwrap().clone()
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
