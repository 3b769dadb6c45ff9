//! Page bitmap cache with LRU eviction
//!
//! Holds one rasterized bitmap per page index. Resident cost never exceeds
//! the memory limit; the least recently used pages go first.
//!
//! Bitmaps are handed out as [`SharedBitmap`]s. When an entry is evicted
//! while a view row still holds it, the cache only drops its own reference
//! and tracks the buffer as deferred until the row lets go.

use image::{ImageBuffer, Rgba};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

/// Cache key: the page index. Zoom never changes the rendered resolution,
/// so one entry per page is enough.
pub type CacheKey = u32;

pub type SharedBitmap = Arc<PageBitmap>;

#[derive(Debug)]
pub struct PageBitmap {
    pub page_index: u32,
    pub image: ImageBuffer<Rgba<u8>, Vec<u8>>,
}

impl PageBitmap {
    pub fn new(page_index: u32, image: ImageBuffer<Rgba<u8>, Vec<u8>>) -> Self {
        Self { page_index, image }
    }

    /// Bytes held by the pixel buffer.
    pub fn byte_cost(&self) -> usize {
        self.image.as_raw().len()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of bitmaps resident in the cache
    pub entry_count: usize,

    /// Bytes held by resident bitmaps
    pub memory_used: usize,

    /// Maximum resident bytes
    pub memory_limit: usize,

    /// Evicted bitmaps still held by a view row
    pub deferred_count: usize,

    /// Bytes held by deferred bitmaps
    pub deferred_bytes: usize,

    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Deferred {
    bitmap: Weak<PageBitmap>,
    bytes: usize,
}

struct CacheState {
    entries: HashMap<CacheKey, SharedBitmap>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<CacheKey>,

    memory_used: usize,
    memory_limit: usize,
    deferred: Vec<Deferred>,
    stats: CacheStats,
}

impl CacheState {
    fn new(memory_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            memory_used: 0,
            memory_limit,
            deferred: Vec::new(),
            stats: CacheStats { memory_limit, ..Default::default() },
        }
    }

    fn touch(&mut self, key: CacheKey) {
        self.lru_queue.retain(|&k| k != key);
        self.lru_queue.push_back(key);
    }

    /// Drop the cache's reference. Buffers still bound elsewhere are tracked
    /// until their last holder releases them.
    fn release(&mut self, bitmap: SharedBitmap) {
        self.memory_used = self.memory_used.saturating_sub(bitmap.byte_cost());
        if Arc::strong_count(&bitmap) > 1 {
            self.deferred.push(Deferred { bitmap: Arc::downgrade(&bitmap), bytes: bitmap.byte_cost() });
        }
    }

    fn remove_entry(&mut self, key: CacheKey) -> bool {
        match self.entries.remove(&key) {
            Some(bitmap) => {
                self.lru_queue.retain(|&k| k != key);
                self.release(bitmap);
                true
            }
            None => false,
        }
    }

    fn evict_lru(&mut self) -> bool {
        while let Some(key) = self.lru_queue.pop_front() {
            if let Some(bitmap) = self.entries.remove(&key) {
                self.release(bitmap);
                self.stats.evictions += 1;
                return true;
            }
        }
        false
    }

    fn evict_to_fit(&mut self, required_size: usize) {
        while self.memory_used + required_size > self.memory_limit && !self.entries.is_empty() {
            if !self.evict_lru() {
                break;
            }
        }
    }

    fn prune_deferred(&mut self) -> usize {
        let before = self.deferred.len();
        self.deferred.retain(|entry| entry.bitmap.strong_count() > 0);
        before - self.deferred.len()
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.memory_used = self.memory_used;
        self.stats.memory_limit = self.memory_limit;
        self.stats.deferred_count = self.deferred.len();
        self.stats.deferred_bytes = self.deferred.iter().map(|entry| entry.bytes).sum();
    }
}

/// Byte-bounded page bitmap cache. Cloning shares the same storage.
#[derive(Clone)]
pub struct BitmapCache {
    state: Arc<Mutex<CacheState>>,
}

impl BitmapCache {
    pub fn new(memory_limit: usize) -> Self {
        Self { state: Arc::new(Mutex::new(CacheState::new(memory_limit))) }
    }

    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Store a page bitmap, evicting least recently used pages to make room.
    ///
    /// A bitmap larger than the whole limit is returned to the caller but
    /// not retained.
    pub fn put(&self, key: CacheKey, image: ImageBuffer<Rgba<u8>, Vec<u8>>) -> SharedBitmap {
        let bitmap = Arc::new(PageBitmap::new(key, image));
        let cost = bitmap.byte_cost();
        let mut state = self.state.lock().unwrap();

        state.remove_entry(key);

        if cost > state.memory_limit {
            debug!("page {key} bitmap ({cost} bytes) exceeds cache limit, not retained");
            state.prune_deferred();
            state.sync_stats();
            return bitmap;
        }

        state.evict_to_fit(cost);
        state.memory_used += cost;
        state.entries.insert(key, Arc::clone(&bitmap));
        state.touch(key);
        state.prune_deferred();
        state.sync_stats();

        bitmap
    }

    /// Fetch a page bitmap and mark it most recently used.
    pub fn get(&self, key: CacheKey) -> Option<SharedBitmap> {
        let mut state = self.state.lock().unwrap();

        match state.entries.get(&key).cloned() {
            Some(bitmap) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(bitmap)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Residency check that leaves LRU order and stats untouched.
    pub fn contains(&self, key: CacheKey) -> bool {
        self.state.lock().unwrap().entries.contains_key(&key)
    }

    pub fn remove(&self, key: CacheKey) -> bool {
        let mut state = self.state.lock().unwrap();
        let removed = state.remove_entry(key);
        state.sync_stats();
        removed
    }

    /// Drop every resident bitmap. Returns how many entries were evicted.
    pub fn evict_all(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let count = state.entries.len();

        let drained: Vec<SharedBitmap> = state.entries.drain().map(|(_, bitmap)| bitmap).collect();
        for bitmap in drained {
            state.release(bitmap);
        }
        state.lru_queue.clear();
        state.memory_used = 0;
        state.stats.evictions += count as u64;
        state.prune_deferred();
        state.sync_stats();

        count
    }

    /// Forget deferred buffers whose last holder has let go. Returns how many
    /// were released.
    pub fn release_detached(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let released = state.prune_deferred();
        state.sync_stats();
        released
    }

    pub fn memory_used(&self) -> usize {
        self.state.lock().unwrap().memory_used
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident keys from least to most recently used.
    pub fn lru_order(&self) -> Vec<CacheKey> {
        self.state.lock().unwrap().lru_queue.iter().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap().stats
    }
}
