//! Per-page dimensions, measured lazily and backfilled in the background.

use crate::document::DocumentHandle;
use log::{debug, warn};
use pdf_engine::{PageSize, LETTER};
use pdf_viewer_scheduler::{CancellationToken, Generation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Default)]
struct MetadataState {
    generation: Generation,
    page_count: u32,
    sizes: HashMap<u32, PageSize>,
}

/// Page sizes for the current document.
///
/// Entries are written once per generation and cleared by
/// [`reset`](Self::reset) when the document is replaced.
#[derive(Clone, Default)]
pub struct PageMetadataStore {
    inner: Arc<Mutex<MetadataState>>,
}

impl PageMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, generation: Generation, page_count: u32) {
        let mut state = self.inner.lock().unwrap();
        state.generation = generation;
        state.page_count = page_count;
        state.sizes.clear();
    }

    /// Record a measured size. Ignored for stale generations, out-of-range
    /// pages and pages that are already known.
    pub fn insert(&self, generation: Generation, page_index: u32, size: PageSize) -> bool {
        let mut state = self.inner.lock().unwrap();
        if state.generation != generation || page_index >= state.page_count {
            return false;
        }
        if state.sizes.contains_key(&page_index) {
            return false;
        }
        state.sizes.insert(page_index, size);
        true
    }

    pub fn get(&self, page_index: u32) -> Option<PageSize> {
        self.inner.lock().unwrap().sizes.get(&page_index).copied()
    }

    pub fn generation(&self) -> Generation {
        self.inner.lock().unwrap().generation
    }

    pub fn measured_count(&self) -> usize {
        self.inner.lock().unwrap().sizes.len()
    }

    /// Size of `page_index`, measuring it through the engine when the
    /// backfill has not reached it yet. Failed measurements fall back to
    /// US Letter and are not recorded.
    pub fn dimensions(&self, handle: &DocumentHandle, page_index: u32) -> PageSize {
        if let Some(size) = self.get(page_index) {
            return size;
        }
        match handle.page_size(page_index) {
            Ok(size) => {
                self.insert(handle.generation(), page_index, size);
                size
            }
            Err(err) => {
                warn!("measuring page {page_index} failed, assuming US Letter: {err}");
                LETTER
            }
        }
    }

    /// Measure page 0 on the open path so load-complete can report it.
    pub fn prime_first_page(&self, handle: &DocumentHandle) -> PageSize {
        self.reset(handle.generation(), handle.page_count());
        self.dimensions(handle, 0)
    }

    /// Measure the remaining pages on a background thread: the first
    /// `initial_batch` pages with `fast_delay` between them, the rest with
    /// `slow_delay`. Stops as soon as `token` is cancelled or the store moves
    /// to another generation.
    pub fn spawn_backfill(
        &self,
        handle: Arc<DocumentHandle>,
        token: CancellationToken,
        initial_batch: u32,
        fast_delay: Duration,
        slow_delay: Duration,
    ) -> JoinHandle<()> {
        let store = self.clone();
        thread::Builder::new()
            .name("pdf-metadata-backfill".to_owned())
            .spawn(move || {
                let page_count = handle.page_count();
                let split = initial_batch.min(page_count).max(1);

                let completed = store.backfill_range(&handle, &token, 1..split, fast_delay)
                    && store.backfill_range(&handle, &token, split..page_count, slow_delay);

                debug!(
                    "metadata backfill for generation {} {}",
                    handle.generation(),
                    if completed { "finished" } else { "stopped" }
                );
            })
            .expect("Failed to spawn metadata backfill thread")
    }

    fn backfill_range(
        &self,
        handle: &DocumentHandle,
        token: &CancellationToken,
        pages: std::ops::Range<u32>,
        delay: Duration,
    ) -> bool {
        for page_index in pages {
            if token.is_cancelled() || self.generation() != handle.generation() {
                return false;
            }
            if self.get(page_index).is_none() {
                self.dimensions(handle, page_index);
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_fake, wait_until};
    use pdf_engine::testing::{FakeScript, RenderRecorder};

    #[test]
    fn first_page_is_measured_synchronously() {
        let temp = tempfile::tempdir().unwrap();
        let handle = open_fake(
            temp.path(),
            FakeScript::pages(3).with_page_size(0, 400.0, 600.0),
            RenderRecorder::default(),
            1,
        );
        let store = PageMetadataStore::new();

        let size = store.prime_first_page(&handle);
        assert_eq!(size, PageSize { width_pt: 400.0, height_pt: 600.0 });
        assert_eq!(store.measured_count(), 1);
    }

    #[test]
    fn entries_are_write_once_per_generation() {
        let store = PageMetadataStore::new();
        store.reset(4, 2);
        let a4 = PageSize { width_pt: 595.0, height_pt: 842.0 };

        assert!(store.insert(4, 1, a4));
        assert!(!store.insert(4, 1, LETTER));
        assert!(!store.insert(3, 0, LETTER));
        assert!(!store.insert(4, 2, LETTER));
        assert_eq!(store.get(1), Some(a4));

        store.reset(5, 2);
        assert_eq!(store.get(1), None);
    }

    #[test]
    fn failed_measurement_falls_back_to_letter() {
        let temp = tempfile::tempdir().unwrap();
        let handle = open_fake(temp.path(), FakeScript::pages(2), RenderRecorder::default(), 1);
        let store = PageMetadataStore::new();
        store.reset(1, 2);

        assert_eq!(store.dimensions(&handle, 9), LETTER);
        assert_eq!(store.get(9), None);
    }

    #[test]
    fn backfill_measures_every_page_once() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = RenderRecorder::default();
        let handle = open_fake(temp.path(), FakeScript::pages(15), recorder.clone(), 1);
        let store = PageMetadataStore::new();
        store.prime_first_page(&handle);

        store
            .spawn_backfill(handle.clone(), CancellationToken::new(), 10, Duration::ZERO, Duration::ZERO)
            .join()
            .unwrap();

        assert_eq!(store.measured_count(), 15);
        assert!((0..15).all(|page| recorder.size_queries(page) == 1));
    }

    #[test]
    fn backfill_stops_on_cancel() {
        let temp = tempfile::tempdir().unwrap();
        let handle = open_fake(temp.path(), FakeScript::pages(50), RenderRecorder::default(), 1);
        let store = PageMetadataStore::new();
        store.prime_first_page(&handle);
        let token = CancellationToken::new();

        let worker = store.spawn_backfill(
            handle.clone(),
            token.clone(),
            2,
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        assert!(wait_until(|| store.measured_count() >= 2));
        token.cancel();
        worker.join().unwrap();

        assert!(store.measured_count() < 50);
    }

    #[test]
    fn backfill_stops_when_generation_moves_on() {
        let temp = tempfile::tempdir().unwrap();
        let handle = open_fake(temp.path(), FakeScript::pages(20), RenderRecorder::default(), 1);
        let store = PageMetadataStore::new();
        store.prime_first_page(&handle);
        store.reset(2, 20);

        store
            .spawn_backfill(handle, CancellationToken::new(), 5, Duration::ZERO, Duration::ZERO)
            .join()
            .unwrap();

        assert_eq!(store.measured_count(), 0);
    }
}
