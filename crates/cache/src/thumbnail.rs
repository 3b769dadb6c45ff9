//! Persistent thumbnail store
//!
//! Thumbnails are JPEG files under `{cache_root}/thumbnails/{document_hash}/{page}.jpg`.
//! Entries are keyed by document hash and page index, so they outlive the
//! document handle that produced them. The store is shared by handle: clone
//! it into every pipeline that needs it.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgba};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("thumbnail I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("thumbnail encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl ThumbnailError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailStats {
    pub memory_entries: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub saved: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ThumbnailKey {
    document_hash: String,
    page_index: u32,
}

impl ThumbnailKey {
    fn new(document_hash: &str, page_index: u32) -> Self {
        Self { document_hash: document_hash.to_owned(), page_index }
    }
}

#[derive(Default)]
struct StoreState {
    memory: HashMap<ThumbnailKey, PathBuf>,
    stats: ThumbnailStats,
}

#[derive(Clone)]
pub struct ThumbnailStore {
    root: PathBuf,
    state: Arc<Mutex<StoreState>>,
}

impl ThumbnailStore {
    /// Store rooted at `{cache_root}/thumbnails`. Nothing is created on disk
    /// until the first save.
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            root: cache_root.as_ref().join("thumbnails"),
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, document_hash: &str, page_index: u32) -> PathBuf {
        self.root.join(document_hash).join(format!("{page_index}.jpg"))
    }

    /// Memory first, then disk. A disk hit is promoted to memory.
    pub fn lookup(&self, document_hash: &str, page_index: u32) -> Option<PathBuf> {
        let key = ThumbnailKey::new(document_hash, page_index);
        let mut state = self.state.lock().unwrap();

        if let Some(path) = state.memory.get(&key).cloned() {
            if path.is_file() {
                state.stats.memory_hits += 1;
                return Some(path);
            }
            state.memory.remove(&key);
        }

        let path = self.path_for(document_hash, page_index);
        if path.is_file() {
            state.memory.insert(key, path.clone());
            state.stats.disk_hits += 1;
            state.stats.memory_entries = state.memory.len();
            return Some(path);
        }

        state.stats.misses += 1;
        state.stats.memory_entries = state.memory.len();
        None
    }

    /// Encode `image` as JPEG and persist it atomically. Returns the final path.
    pub fn save(
        &self,
        document_hash: &str,
        page_index: u32,
        image: &ImageBuffer<Rgba<u8>, Vec<u8>>,
        quality: u8,
    ) -> Result<PathBuf, ThumbnailError> {
        let path = self.path_for(document_hash, page_index);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| ThumbnailError::io(&dir, err))?;

        let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
        let temp = NamedTempFile::new_in(&dir).map_err(|err| ThumbnailError::io(&dir, err))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode_image(&rgb)?;
            writer.flush().map_err(|err| ThumbnailError::io(temp.path(), err))?;
        }
        temp.persist(&path).map_err(|err| ThumbnailError::io(&path, err.error))?;

        let mut state = self.state.lock().unwrap();
        state.memory.insert(ThumbnailKey::new(document_hash, page_index), path.clone());
        state.stats.saved += 1;
        state.stats.memory_entries = state.memory.len();

        Ok(path)
    }

    /// Forget in-memory entries. Files stay on disk.
    pub fn clear_memory(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let cleared = state.memory.len();
        state.memory.clear();
        state.stats.memory_entries = 0;
        cleared
    }

    /// Remove the whole thumbnail directory and every in-memory entry.
    pub fn purge_disk(&self) -> Result<(), ThumbnailError> {
        self.clear_memory();
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("purged thumbnail cache at {}", self.root.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ThumbnailError::io(&self.root, err)),
        }
    }

    pub fn stats(&self) -> ThumbnailStats {
        self.state.lock().unwrap().stats
    }
}
