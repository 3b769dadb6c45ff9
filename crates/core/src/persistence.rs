//! Last viewed page per document
//!
//! Positions are kept in `{cache_root}/positions.json`, a JSON object mapping
//! document hashes to 0-based page indices.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

pub const POSITIONS_FILE: &str = "positions.json";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Reads and writes the positions file. Clones share one lock, so writes
/// from the settle path and the load path do not interleave.
#[derive(Clone)]
pub struct LastPageStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl LastPageStore {
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self { path: cache_root.as_ref().join(POSITIONS_FILE), lock: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, document_hash: &str) -> PersistenceResult<Option<u32>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_all()?.get(document_hash).copied())
    }

    pub fn set(&self, document_hash: &str, page: u32) -> PersistenceResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut positions = self.read_all()?;
        if positions.get(document_hash) == Some(&page) {
            return Ok(());
        }
        positions.insert(document_hash.to_owned(), page);
        self.write_all(&positions)
    }

    fn read_all(&self) -> PersistenceResult<HashMap<String, u32>> {
        match fs::read_to_string(&self.path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    // Write to a sibling temp file, then rename over the old one.
    fn write_all(&self, positions: &HashMap<String, u32>) -> PersistenceResult<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(positions)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}
