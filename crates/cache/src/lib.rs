//! PDF Viewer Cache Library
//!
//! Page bitmap cache with LRU eviction under a byte budget, system memory
//! detection, and the persistent thumbnail store.

pub mod bitmap;
pub mod memory_budget;
pub mod thumbnail;

pub use bitmap::{BitmapCache, CacheKey, CacheStats, PageBitmap, SharedBitmap};
pub use memory_budget::{available_memory_bytes, bitmap_budget_bytes};
pub use thumbnail::{ThumbnailError, ThumbnailStats, ThumbnailStore};
