//! The viewer: one coordinating owner per document view.
//!
//! [`PdfViewer`] owns the current document and fans work out to the render
//! and thumbnail pools. Every load advances the event generation before any
//! new work starts, so results of a superseded document never reach the
//! host. Commands return their errors directly; asynchronous outcomes are
//! reported through the [`EventSink`].
//!
//! Locks are always taken in the order viewer state, then event gate.
//! Worker threads only ever take the gate. Nothing holding viewer state
//! waits on the document's engine lock.

use crate::config::{ConfigError, ViewerConfig};
use crate::document::{default_engine_factory, DocumentHandle, DocumentState, EngineFactory};
use crate::error::ViewerError;
use crate::events::{EventGate, EventSink, ViewerEvent};
use crate::layout::PageLayout;
use crate::metadata::PageMetadataStore;
use crate::persistence::LastPageStore;
use crate::render::{RenderScheduler, RenderSettings};
use crate::source::{DocumentSourceResolver, HttpFetcher, SourceLocator, UreqFetcher};
use crate::thumbnail::{ThumbnailPipeline, ThumbnailRequest, ThumbnailSettings};
use crate::zoom::{Point, ScaleState};
use log::{debug, info, warn};
use pdf_engine::{PageSize, LETTER};
use pdf_viewer_cache::{
    bitmap_budget_bytes, BitmapCache, CacheStats, SharedBitmap, ThumbnailStats, ThumbnailStore,
};
use pdf_viewer_scheduler::{CancellationToken, Debouncer, Generation};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub page_width: f32,
    pub page_height: f32,
    pub current_page: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewerStats {
    pub bitmaps: CacheStats,
    pub thumbnails: ThumbnailStats,
}

pub struct ViewerBuilder {
    config: ViewerConfig,
    sink: Option<Arc<dyn EventSink>>,
    engine_factory: Option<EngineFactory>,
    fetcher: Option<Arc<dyn HttpFetcher>>,
    thumbnail_store: Option<ThumbnailStore>,
    bitmap_budget: Option<usize>,
}

impl ViewerBuilder {
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share one thumbnail store between several viewers.
    pub fn thumbnail_store(mut self, store: ThumbnailStore) -> Self {
        self.thumbnail_store = Some(store);
        self
    }

    /// Override the bitmap cache budget, in bytes.
    pub fn bitmap_budget(mut self, bytes: usize) -> Self {
        self.bitmap_budget = Some(bytes);
        self
    }

    pub fn build(self) -> Result<PdfViewer, ConfigError> {
        let config = self.config;
        config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(|_event: ViewerEvent| {}) as Arc<dyn EventSink>);
        let gate = Arc::new(EventGate::new(sink));
        let fetcher = self.fetcher.unwrap_or_else(|| {
            Arc::new(UreqFetcher::new(config.connect_timeout(), config.read_timeout()))
                as Arc<dyn HttpFetcher>
        });
        let budget =
            self.bitmap_budget.unwrap_or_else(|| bitmap_budget_bytes(config.bitmap_cache_fraction));
        let store = self.thumbnail_store.unwrap_or_else(|| ThumbnailStore::new(&config.cache_root));
        let metadata = PageMetadataStore::new();

        let bitmaps = BitmapCache::new(budget);
        let render = RenderScheduler::new(
            bitmaps.clone(),
            gate.clone(),
            metadata.clone(),
            RenderSettings {
                quality_multiplier: config.quality_multiplier,
                max_texture_size: config.max_texture_size,
                preload_radius: config.preload_radius,
                workers: config.render_workers,
            },
        );
        let thumbnails = ThumbnailPipeline::new(
            store,
            bitmaps,
            gate.clone(),
            metadata.clone(),
            ThumbnailSettings {
                width: config.thumbnail_width,
                quality: config.thumbnail_quality,
                concurrency: config.thumbnail_concurrency,
                batch_delay: config.thumbnail_batch_delay(),
            },
        );

        let layout = PageLayout::new(config.spacing, config.insets);
        let zoom = ScaleState::new(config.min_scale, config.max_scale);
        render.set_view_width(layout.row_width());

        debug!("viewer built with a {budget} byte bitmap budget");

        let inner = ViewerInner {
            resolver: DocumentSourceResolver::new(
                &config.cache_root,
                config.cache_freshness(),
                fetcher,
            ),
            factory: self.engine_factory.unwrap_or_else(default_engine_factory),
            positions: LastPageStore::new(&config.cache_root),
            settle: Debouncer::new("pdf-viewer-settle", config.settle_debounce()),
            state: Mutex::new(ViewState {
                lifecycle: DocumentState::Empty,
                source: None,
                document: None,
                load_token: None,
                layout,
                zoom,
                last_emitted_page: None,
                generation: gate.current(),
                first_size: LETTER,
            }),
            config,
            gate,
            metadata,
            render,
            thumbnails,
        };

        Ok(PdfViewer { inner: Arc::new(inner) })
    }
}

struct ViewState {
    lifecycle: DocumentState,
    source: Option<String>,
    document: Option<Arc<DocumentHandle>>,
    load_token: Option<CancellationToken>,
    layout: PageLayout,
    zoom: ScaleState,
    last_emitted_page: Option<u32>,
    generation: Generation,
    first_size: PageSize,
}

impl ViewState {
    fn ready_document(&self) -> Result<Arc<DocumentHandle>, ViewerError> {
        match (&self.lifecycle, &self.document) {
            (DocumentState::Ready, Some(document)) => Ok(document.clone()),
            _ => Err(ViewerError::NotLoaded),
        }
    }
}

struct ViewerInner {
    config: ViewerConfig,
    gate: Arc<EventGate>,
    state: Mutex<ViewState>,
    factory: EngineFactory,
    resolver: DocumentSourceResolver,
    metadata: PageMetadataStore,
    render: RenderScheduler,
    thumbnails: ThumbnailPipeline,
    positions: LastPageStore,
    settle: Debouncer,
}

impl ViewerInner {
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap()
    }

    fn start_load(self: &Arc<Self>, source: &str, force: bool) {
        let mut state = self.state();
        match state.lifecycle {
            DocumentState::Closed => {
                warn!("ignoring load of {source:?} after teardown");
                return;
            }
            DocumentState::Opening | DocumentState::Ready
                if !force && state.source.as_deref() == Some(source) =>
            {
                debug!("{source:?} is already loaded");
                return;
            }
            _ => {}
        }

        if let Some(previous) = state.load_token.take() {
            previous.cancel();
        }
        let generation = self.gate.advance();
        self.settle.cancel();
        self.render.reset();
        self.thumbnails.reset();
        self.metadata.reset(generation, 0);

        let token = CancellationToken::new();
        state.lifecycle = DocumentState::Opening;
        state.source = Some(source.to_owned());
        state.document = None;
        state.load_token = Some(token.clone());
        state.layout.clear();
        state.last_emitted_page = None;
        state.generation = generation;
        state.first_size = LETTER;
        self.gate.emit(generation, ViewerEvent::LoadingChange { is_loading: true });
        drop(state);

        info!("loading {source} (generation {generation})");
        let inner = self.clone();
        let source = source.to_owned();
        thread::Builder::new()
            .name("pdf-viewer-load".to_owned())
            .spawn(move || inner.run_load(&source, generation, token))
            .expect("Failed to spawn load thread");
    }

    fn run_load(self: &Arc<Self>, source: &str, generation: Generation, token: CancellationToken) {
        let opened = SourceLocator::parse(source)
            .and_then(|locator| self.resolver.resolve(&locator, &token))
            .and_then(|resolved| {
                if token.is_cancelled() {
                    return Err(ViewerError::Cancelled);
                }
                DocumentHandle::open(&self.factory, &resolved, generation)
            });

        let document = match opened {
            Ok(document) => Arc::new(document),
            Err(ViewerError::Cancelled) => {
                debug!("load of {source} superseded");
                return;
            }
            Err(err) => {
                self.fail_load(generation, err);
                return;
            }
        };

        let restored = if self.config.persist_last_page {
            self.positions.get(document.document_hash()).unwrap_or_else(|err| {
                warn!("reading last page failed: {err}");
                None
            })
        } else {
            None
        };

        let mut state = self.state();
        if state.generation != generation || token.is_cancelled() {
            debug!("discarding superseded document {}", document.document_hash());
            return;
        }

        let page_count = document.page_count();
        let first = self.metadata.prime_first_page(&document);
        state.document = Some(document.clone());
        state.lifecycle = DocumentState::Ready;
        state.first_size = first;
        self.refresh_layout(&mut state, &document);
        self.render.attach(document.clone());
        self.thumbnails.attach(document.clone());

        self.gate.emit(
            generation,
            ViewerEvent::LoadComplete {
                page_count,
                page_width: first.width_pt,
                page_height: first.height_pt,
            },
        );
        self.gate.emit(generation, ViewerEvent::LoadingChange { is_loading: false });

        self.metadata.spawn_backfill(
            document.clone(),
            token,
            self.config.metadata_initial_batch,
            Duration::from_millis(self.config.metadata_fast_delay_ms),
            Duration::from_millis(self.config.metadata_slow_delay_ms),
        );

        let mut current = 0;
        if let Some(page) = restored.filter(|page| *page > 0 && *page < page_count) {
            state.layout.scroll_to_page(page);
            current = state.layout.current_page();
            debug!("restored last viewed page {current}");
            self.gate.emit(generation, ViewerEvent::PageChange { page: current, page_count });
        }
        state.last_emitted_page = Some(current);
        self.render_visible(&state);
    }

    fn fail_load(&self, generation: Generation, err: ViewerError) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        warn!("load failed: {err}");
        state.lifecycle = DocumentState::Empty;
        state.source = None;
        state.document = None;
        state.load_token = None;
        self.gate.emit(generation, ViewerEvent::error(&err));
        self.gate.emit(generation, ViewerEvent::LoadingChange { is_loading: false });
    }

    /// Rebuild row heights from whatever page sizes are known so far;
    /// unmeasured pages borrow the first page's aspect.
    fn refresh_layout(&self, state: &mut ViewState, document: &DocumentHandle) {
        let first = state.first_size;
        state
            .layout
            .rebuild(document.page_count(), |page| self.metadata.get(page).unwrap_or(first).aspect());
    }

    fn render_visible(&self, state: &ViewState) {
        if let Some(range) = state.layout.visible_range(state.zoom.scale()) {
            self.render.ensure_rendered(*range.start(), *range.end());
        }
    }

    fn schedule_settle(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.settle.call(move || {
            if let Some(inner) = weak.upgrade() {
                inner.settle();
            }
        });
    }

    /// Runs once scrolling or zooming comes to rest.
    fn settle(&self) {
        let mut state = self.state();
        let Ok(document) = state.ready_document() else {
            return;
        };

        self.refresh_layout(&mut state, &document);
        let page = state.layout.current_page();
        if state.last_emitted_page != Some(page) {
            state.last_emitted_page = Some(page);
            self.gate.emit(
                state.generation,
                ViewerEvent::PageChange { page, page_count: document.page_count() },
            );
        }
        self.render_visible(&state);
        drop(state);

        if self.config.persist_last_page {
            if let Err(err) = self.positions.set(document.document_hash(), page) {
                warn!("saving last page failed: {err}");
            }
        }
    }

    fn emit_scale(&self, state: &ViewState, scale: f32) {
        self.render.set_scale(scale);
        self.thumbnails.set_scale(scale);
        self.gate.emit(state.generation, ViewerEvent::ScaleChange { scale });
    }

    fn zoom_enabled(&self) -> Result<(), ViewerError> {
        if self.config.enable_zoom {
            Ok(())
        } else {
            Err(ViewerError::ZoomDisabled)
        }
    }
}

/// Headless PDF viewer.
///
/// Cheap to clone; clones drive the same document.
#[derive(Clone)]
pub struct PdfViewer {
    inner: Arc<ViewerInner>,
}

impl PdfViewer {
    pub fn builder(config: ViewerConfig) -> ViewerBuilder {
        ViewerBuilder {
            config,
            sink: None,
            engine_factory: None,
            fetcher: None,
            thumbnail_store: None,
            bitmap_budget: None,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.inner.config
    }

    /// Start loading `source` in the background. Loading the source that is
    /// already open is a no-op.
    pub fn load(&self, source: &str) {
        self.inner.start_load(source, false);
    }

    /// Reload `source` even if it is the current one.
    pub fn reload(&self, source: &str) {
        self.inner.start_load(source, true);
    }

    pub fn state(&self) -> DocumentState {
        self.inner.state().lifecycle
    }

    pub fn go_to_page(&self, index: i64) -> Result<(), ViewerError> {
        let inner = &self.inner;
        let mut state = inner.state();
        let document = state.ready_document()?;
        let page_count = document.page_count();
        let page = u32::try_from(index)
            .ok()
            .filter(|page| *page < page_count)
            .ok_or(ViewerError::InvalidPageIndex { index, page_count })?;

        inner.refresh_layout(&mut state, &document);
        state.layout.scroll_to_page(page);
        state.last_emitted_page = Some(page);
        inner.gate.emit(state.generation, ViewerEvent::PageChange { page, page_count });
        drop(state);

        inner.schedule_settle();
        Ok(())
    }

    /// Report the host's scroll offset, in unscaled view units. Page-change
    /// and rendering follow once scrolling settles.
    pub fn on_scroll(&self, offset: f32) {
        let mut state = self.inner.state();
        if state.ready_document().is_err() {
            return;
        }
        state.layout.scroll_to(offset);
        drop(state);
        self.inner.schedule_settle();
    }

    pub fn set_viewport(&self, width: f32, height: f32) {
        let inner = &self.inner;
        let mut state = inner.state();
        state.layout.set_viewport(width, height);
        state.zoom.set_viewport(width, height);
        inner.render.set_view_width(state.layout.row_width());
        if let Ok(document) = state.ready_document() {
            inner.refresh_layout(&mut state, &document);
            drop(state);
            inner.schedule_settle();
        }
    }

    /// Clamp and apply `value`. Returns the resulting scale; an unchanged
    /// value emits nothing.
    pub fn set_scale(&self, value: f32) -> Result<f32, ViewerError> {
        let inner = &self.inner;
        inner.zoom_enabled()?;
        let mut state = inner.state();
        match state.zoom.set_scale(value) {
            Some(scale) => {
                inner.emit_scale(&state, scale);
                drop(state);
                inner.schedule_settle();
                Ok(scale)
            }
            None => Ok(state.zoom.scale()),
        }
    }

    pub fn current_scale(&self) -> f32 {
        self.inner.state().zoom.scale()
    }

    pub fn pan(&self) -> Point {
        self.inner.state().zoom.pan()
    }

    pub fn pan_by(&self, dx: f32, dy: f32) -> Point {
        self.inner.state().zoom.pan_by(dx, dy)
    }

    pub fn pinch_begin(&self, focus: Point) -> Result<(), ViewerError> {
        self.inner.zoom_enabled()?;
        self.inner.state().zoom.pinch_begin(focus);
        Ok(())
    }

    pub fn pinch_update(&self, factor: f32, focus: Point) -> Result<f32, ViewerError> {
        self.inner.zoom_enabled()?;
        let mut state = self.inner.state();
        if let Some(scale) = state.zoom.pinch_update(factor, focus) {
            self.inner.emit_scale(&state, scale);
        }
        Ok(state.zoom.scale())
    }

    pub fn pinch_end(&self) -> Result<f32, ViewerError> {
        self.inner.zoom_enabled()?;
        let mut state = self.inner.state();
        if let Some(scale) = state.zoom.pinch_end() {
            self.inner.emit_scale(&state, scale);
        }
        let scale = state.zoom.scale();
        drop(state);
        self.inner.schedule_settle();
        Ok(scale)
    }

    pub fn double_tap(&self, point: Point) -> Result<f32, ViewerError> {
        self.inner.zoom_enabled()?;
        let mut state = self.inner.state();
        let changed = state.zoom.double_tap(point);
        if let Some(scale) = changed {
            self.inner.emit_scale(&state, scale);
        }
        let scale = state.zoom.scale();
        drop(state);
        if changed.is_some() {
            self.inner.schedule_settle();
        }
        Ok(scale)
    }

    pub fn generate_thumbnail(&self, index: i64) -> Result<ThumbnailRequest, ViewerError> {
        self.inner.state().ready_document()?;
        self.inner.thumbnails.generate(index)
    }

    pub fn generate_all_thumbnails(&self) -> Result<(), ViewerError> {
        self.inner.state().ready_document()?;
        self.inner.thumbnails.generate_all()
    }

    pub fn document_info(&self) -> Option<DocumentInfo> {
        let state = self.inner.state();
        let document = state.ready_document().ok()?;
        Some(DocumentInfo {
            page_count: document.page_count(),
            page_width: state.first_size.width_pt,
            page_height: state.first_size.height_pt,
            current_page: state.layout.current_page(),
        })
    }

    /// The bitmap to show in the row for `page_index`. A miss schedules the
    /// page; a `PageRendered` event follows when it lands.
    pub fn bind_row(&self, page_index: u32) -> Option<SharedBitmap> {
        let bitmap = self.inner.render.bitmap(page_index);
        if bitmap.is_none() && self.state() == DocumentState::Ready {
            self.inner.render.ensure_rendered(page_index, page_index);
        }
        bitmap
    }

    /// Give back a row's bitmap. Returns how many evicted buffers were
    /// released as a result.
    pub fn detach_row(&self, bitmap: SharedBitmap) -> usize {
        drop(bitmap);
        self.inner.render.cache().release_detached()
    }

    pub fn on_memory_pressure(&self) {
        let evicted = self.inner.render.cache().evict_all();
        let cleared = self.inner.thumbnails.store().clear_memory();
        info!("memory pressure: evicted {evicted} bitmaps, {cleared} thumbnail entries");
    }

    pub fn on_background(&self) {
        if !self.inner.config.purge_thumbnails_on_background {
            return;
        }
        if let Err(err) = self.inner.thumbnails.store().purge_disk() {
            warn!("purging thumbnails failed: {err}");
        }
    }

    /// Cancel all work and release the document. The viewer ignores loads
    /// afterwards.
    pub fn teardown(&self) {
        let inner = &self.inner;
        let mut state = inner.state();
        if state.lifecycle == DocumentState::Closed {
            return;
        }
        if let Some(token) = state.load_token.take() {
            token.cancel();
        }
        state.generation = inner.gate.advance();
        inner.settle.cancel();
        inner.render.reset();
        inner.thumbnails.reset();
        state.document = None;
        state.source = None;
        state.layout.clear();
        state.lifecycle = DocumentState::Closed;
        debug!("viewer torn down");
    }

    pub fn stats(&self) -> ViewerStats {
        ViewerStats {
            bitmaps: self.inner.render.cache().stats(),
            thumbnails: self.inner.thumbnails.store().stats(),
        }
    }
}
