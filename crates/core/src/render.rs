//! Page render scheduling.
//!
//! [`RenderScheduler::ensure_rendered`] turns a visible range into at most
//! one job per non-resident page in the preload window. Jobs run on a
//! dedicated worker pool, measure and rasterize their page through the
//! document handle, and commit into the bitmap cache only while their
//! generation is current.

use crate::document::DocumentHandle;
use crate::error::ViewerError;
use crate::events::{EventGate, ViewerEvent};
use crate::metadata::PageMetadataStore;
use log::{debug, warn};
use pdf_engine::{PageSize, PdfEngineError, RenderRequest};
use pdf_viewer_cache::{BitmapCache, SharedBitmap};
use pdf_viewer_scheduler::{
    preload_window, render_order, CancellationRegistry, CancellationToken, JobKind, JobScheduler,
    WorkerPool, WorkerPoolConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub quality_multiplier: f32,
    pub max_texture_size: u32,
    pub preload_radius: u32,
    pub workers: usize,
}

/// Bitmap size for a page shown in a row `view_width` wide: the row width
/// times `quality`, height from the page aspect, both scaled down together
/// so neither exceeds `max_texture`.
pub fn target_size(view_width: f32, page: PageSize, quality: f32, max_texture: u32) -> (u32, u32) {
    let aspect = page.aspect();
    let mut width = (view_width * quality).max(1.0);
    let mut height = if aspect > 0.0 && aspect.is_finite() { width / aspect } else { width };

    let largest = width.max(height);
    if largest > max_texture as f32 {
        let factor = max_texture as f32 / largest;
        width *= factor;
        height *= factor;
    }

    let limit = max_texture.max(1);
    ((width.round() as u32).clamp(1, limit), (height.round() as u32).clamp(1, limit))
}

struct RenderShared {
    cache: BitmapCache,
    in_flight: CancellationRegistry<u32>,
    gate: Arc<EventGate>,
    metadata: PageMetadataStore,
    settings: RenderSettings,
    view_width: AtomicU32,
    scale: AtomicU32,
    document: Mutex<Option<Arc<DocumentHandle>>>,
}

impl RenderShared {
    fn view_width(&self) -> f32 {
        f32::from_bits(self.view_width.load(Ordering::Acquire))
    }

    fn scale(&self) -> f32 {
        f32::from_bits(self.scale.load(Ordering::Acquire))
    }

    fn render_page(&self, document: &DocumentHandle, page_index: u32, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }

        let size = self.metadata.dimensions(document, page_index);
        let (width_px, height_px) = target_size(
            self.view_width(),
            size,
            self.settings.quality_multiplier,
            self.settings.max_texture_size,
        );
        let request = RenderRequest { page_index, width_px, height_px };
        let generation = document.generation();

        match document.render(request) {
            Ok(image) => {
                if token.is_cancelled() {
                    return;
                }
                let committed = self.gate.commit_and_emit(
                    generation,
                    || {
                        self.cache.put(page_index, image);
                    },
                    |_| Some(ViewerEvent::PageRendered { page: page_index }),
                );
                if committed.is_none() {
                    debug!("dropping stale render of page {page_index} (generation {generation})");
                }
            }
            Err(PdfEngineError::OutOfMemory { width_px, height_px }) => {
                let scale = self.scale();
                warn!("out of memory rendering page {page_index} at {width_px}x{height_px}, evicting bitmap cache");
                self.gate.commit_and_emit(
                    generation,
                    || self.cache.evict_all(),
                    |_| Some(ViewerEvent::error(&ViewerError::OutOfMemory { scale })),
                );
            }
            Err(err) => warn!("rendering page {page_index} failed: {err}"),
        }
    }
}

pub struct RenderScheduler {
    shared: Arc<RenderShared>,
    scheduler: Arc<JobScheduler>,
    pool: Option<WorkerPool>,
}

impl RenderScheduler {
    pub fn new(
        cache: BitmapCache,
        gate: Arc<EventGate>,
        metadata: PageMetadataStore,
        settings: RenderSettings,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new());
        let pool = WorkerPool::new(
            "pdf-render-worker",
            scheduler.clone(),
            WorkerPoolConfig::new(settings.workers),
        );
        let shared = Arc::new(RenderShared {
            cache,
            in_flight: CancellationRegistry::new(),
            gate,
            metadata,
            settings,
            view_width: AtomicU32::new(crate::layout::DEFAULT_VIEW_WIDTH.to_bits()),
            scale: AtomicU32::new(1.0f32.to_bits()),
            document: Mutex::new(None),
        });

        Self { shared, scheduler, pool: Some(pool) }
    }

    pub fn attach(&self, document: Arc<DocumentHandle>) {
        *self.shared.document.lock().unwrap() = Some(document);
    }

    /// Cancel every queued and running job, drop the document and clear the
    /// cache.
    pub fn reset(&self) {
        let cancelled = self.shared.in_flight.cancel_all();
        self.scheduler.cancel_all();
        self.shared.document.lock().unwrap().take();
        let evicted = self.shared.cache.evict_all();
        debug!("render reset: {cancelled} jobs cancelled, {evicted} bitmaps evicted");
    }

    /// Schedule every page of the preload window around `first..=last` that
    /// is neither cached nor already rendering. Returns the number of jobs
    /// submitted.
    pub fn ensure_rendered(&self, first: u32, last: u32) -> usize {
        let Some(document) = self.document() else {
            return 0;
        };
        let Some(window) =
            preload_window(first, last, self.shared.settings.preload_radius, document.page_count())
        else {
            return 0;
        };

        let mut submitted = 0;
        for (page_index, priority) in render_order(first, last, window) {
            if self.shared.cache.contains(page_index) {
                continue;
            }
            let Some(token) = self.shared.in_flight.register_if_absent(page_index) else {
                continue;
            };

            let shared = self.shared.clone();
            let document = document.clone();
            self.scheduler.submit(
                priority,
                JobKind::RenderPage { page_index },
                Box::new(move |job_token| {
                    if !job_token.is_cancelled() {
                        shared.render_page(&document, page_index, &token);
                    }
                    shared.in_flight.unregister_if(&page_index, &token);
                }),
            );
            submitted += 1;
        }
        submitted
    }

    pub fn set_view_width(&self, width: f32) {
        self.shared.view_width.store(width.max(1.0).to_bits(), Ordering::Release);
    }

    pub fn set_scale(&self, scale: f32) {
        self.shared.scale.store(scale.to_bits(), Ordering::Release);
    }

    pub fn bitmap(&self, page_index: u32) -> Option<SharedBitmap> {
        self.shared.cache.get(page_index)
    }

    pub fn cache(&self) -> &BitmapCache {
        &self.shared.cache
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn is_rendering(&self, page_index: u32) -> bool {
        self.shared.in_flight.contains(&page_index)
    }

    /// Stop the workers after their current jobs.
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

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel;
    use crate::test_support::{open_fake, wait_for_event, wait_until};
    use pdf_engine::testing::{FakeScript, RenderRecorder};
    use pdf_engine::LETTER;
    use std::time::Duration;

    fn settings(preload_radius: u32) -> RenderSettings {
        RenderSettings { quality_multiplier: 1.5, max_texture_size: 4096, preload_radius, workers: 2 }
    }

    fn scheduler(
        preload_radius: u32,
    ) -> (RenderScheduler, Arc<EventGate>, flume::Receiver<ViewerEvent>, PageMetadataStore) {
        let (sink, events) = channel();
        let gate = Arc::new(EventGate::new(Arc::new(sink)));
        let metadata = PageMetadataStore::new();
        let render = RenderScheduler::new(
            BitmapCache::with_mb_limit(256),
            gate.clone(),
            metadata.clone(),
            settings(preload_radius),
        );
        render.set_view_width(100.0);
        (render, gate, events, metadata)
    }

    #[test]
    fn target_size_follows_quality_and_aspect() {
        assert_eq!(target_size(400.0, LETTER, 1.5, 4096), (600, 776));
    }

    #[test]
    fn target_size_clamps_preserving_aspect() {
        let tall = PageSize { width_pt: 100.0, height_pt: 1000.0 };
        assert_eq!(target_size(1000.0, tall, 1.5, 4096), (410, 4096));

        let wide = PageSize { width_pt: 1000.0, height_pt: 500.0 };
        assert_eq!(target_size(4000.0, wide, 1.5, 4096), (4096, 2048));
    }

    #[test]
    fn renders_the_preload_window_once() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = RenderRecorder::default();
        let (render, gate, events, metadata) = scheduler(2);
        let generation = gate.advance();
        let document = open_fake(temp.path(), FakeScript::pages(10), recorder.clone(), generation);
        metadata.prime_first_page(&document);
        render.attach(document);

        assert_eq!(render.ensure_rendered(4, 5), 6);
        assert!(wait_until(|| render.cache().len() == 6));
        assert_eq!(render.ensure_rendered(4, 5), 0);

        assert!((2..=7).all(|page| recorder.render_count(page) == 1));
        assert_eq!(recorder.render_count(1), 0);
        let rendered = events
            .try_iter()
            .filter(|event| matches!(event, ViewerEvent::PageRendered { .. }))
            .count();
        assert_eq!(rendered, 6);
    }

    #[test]
    fn duplicate_requests_while_rendering_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = RenderRecorder::default();
        let (render, gate, _events, metadata) = scheduler(0);
        let generation = gate.advance();
        let script = FakeScript::pages(3).with_render_delay(Duration::from_millis(50));
        let document = open_fake(temp.path(), script, recorder.clone(), generation);
        metadata.prime_first_page(&document);
        render.attach(document);

        assert_eq!(render.ensure_rendered(1, 1), 1);
        assert_eq!(render.ensure_rendered(1, 1), 0);
        assert!(wait_until(|| render.cache().contains(1) && render.in_flight() == 0));
        assert_eq!(recorder.render_count(1), 1);
    }

    #[test]
    fn out_of_memory_evicts_and_reports_scale() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = RenderRecorder::default();
        let (render, gate, events, metadata) = scheduler(0);
        let generation = gate.advance();
        let document =
            open_fake(temp.path(), FakeScript::pages(5).oom_once(3), recorder.clone(), generation);
        metadata.prime_first_page(&document);
        render.attach(document);
        render.set_scale(3.0);

        render.ensure_rendered(0, 0);
        assert!(wait_until(|| render.cache().contains(0)));

        render.ensure_rendered(3, 3);
        let error = wait_for_event(&events, |event| matches!(event, ViewerEvent::Error { .. }));
        match error.unwrap() {
            ViewerEvent::Error { message, code } => {
                assert_eq!(code, "OUT_OF_MEMORY");
                assert!(message.contains("3.0"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(render.cache().is_empty());

        assert!(wait_until(|| !render.is_rendering(3)));
        assert_eq!(render.ensure_rendered(3, 3), 1);
        assert!(wait_until(|| render.cache().contains(3)));
        assert_eq!(recorder.render_count(3), 2);
    }

    #[test]
    fn stale_renders_are_not_committed() {
        let temp = tempfile::tempdir().unwrap();
        let (render, gate, events, metadata) = scheduler(0);
        let generation = gate.advance();
        let script = FakeScript::pages(2).with_render_delay(Duration::from_millis(50));
        let document = open_fake(temp.path(), script, RenderRecorder::default(), generation);
        metadata.prime_first_page(&document);
        render.attach(document);

        render.ensure_rendered(0, 0);
        gate.advance();
        render.reset();

        assert!(wait_until(|| render.in_flight() == 0));
        std::thread::sleep(Duration::from_millis(80));
        assert!(render.cache().is_empty());
        assert!(events.try_iter().all(|event| !matches!(event, ViewerEvent::PageRendered { .. })));
    }

    #[test]
    fn render_errors_are_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = RenderRecorder::default();
        let (render, gate, events, metadata) = scheduler(0);
        let generation = gate.advance();
        let document =
            open_fake(temp.path(), FakeScript::pages(2).fail_once(1), recorder.clone(), generation);
        metadata.prime_first_page(&document);
        render.attach(document);

        render.ensure_rendered(1, 1);
        assert!(wait_until(|| recorder.render_count(1) == 1 && render.in_flight() == 0));
        assert!(!render.cache().contains(1));
        assert!(events.try_iter().all(|event| !matches!(event, ViewerEvent::Error { .. })));

        render.ensure_rendered(1, 1);
        assert!(wait_until(|| render.cache().contains(1)));
    }

    #[test]
    fn nothing_renders_without_a_document() {
        let (render, _gate, _events, _metadata) = scheduler(2);
        assert_eq!(render.ensure_rendered(0, 3), 0);
    }
}
