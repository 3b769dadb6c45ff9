//! Document source resolution.
//!
//! Turns a locator string into a readable local file. Remote documents are
//! cached under `{cache_root}/documents/{md5(url)}.pdf` and reused while
//! fresh; a failed refresh falls back to the stale copy.

use crate::error::ViewerError;
use log::{debug, warn};
use pdf_viewer_scheduler::CancellationToken;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    File(PathBuf),
    Remote(String),
}

impl SourceLocator {
    pub fn parse(raw: &str) -> Result<Self, ViewerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ViewerError::InvalidSource("empty source".to_owned()));
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            return Err(ViewerError::UnsupportedScheme(format!("missing scheme in {raw:?}")));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "file" => file_path(rest)
                .map(SourceLocator::File)
                .ok_or_else(|| ViewerError::InvalidSource(raw.to_owned())),
            "http" | "https" => {
                if rest.is_empty() {
                    return Err(ViewerError::InvalidSource(raw.to_owned()));
                }
                Ok(SourceLocator::Remote(raw.to_owned()))
            }
            other => Err(ViewerError::UnsupportedScheme(other.to_owned())),
        }
    }

    /// Normalized locator string the document hash is derived from.
    pub fn canonical(&self) -> String {
        match self {
            SourceLocator::File(path) => format!("file://{}", path.display()),
            SourceLocator::Remote(url) => url.clone(),
        }
    }

    pub fn document_hash(&self) -> String {
        document_hash(&self.canonical())
    }
}

/// Deterministic hex digest naming cache entries for one logical source.
pub fn document_hash(canonical: &str) -> String {
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

/// `file://` URI for a local path. Characters that would end or
/// reinterpret the path are percent-encoded.
pub fn file_uri(path: &Path) -> String {
    let mut uri = String::from("file://");
    for ch in path.display().to_string().chars() {
        match ch {
            '%' | ' ' | '#' | '?' => uri.push_str(&format!("%{:02X}", ch as u32)),
            _ => uri.push(ch),
        }
    }
    uri
}

/// Local path named by the part of a `file://` URI after the scheme. Only
/// an empty or `localhost` authority is accepted.
fn file_path(rest: &str) -> Option<PathBuf> {
    let path = if rest.starts_with('/') {
        rest
    } else {
        let (host, path) = rest.split_at(rest.find('/')?);
        if !host.eq_ignore_ascii_case("localhost") {
            return None;
        }
        path
    };
    let path = percent_decode(path)?;
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Decodes `%XX` escapes. A `%` not followed by two hex digits is kept as is.
fn percent_decode(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = match bytes.get(i + 1..i + 3) {
            Some(&[hi, lo]) if bytes[i] == b'%' => hex_value(hi).zip(hex_value(lo)),
            _ => None,
        };
        match escaped {
            Some((hi, lo)) => {
                decoded.push(hi << 4 | lo);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).ok()
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|value| value as u8)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Streams a remote document into `dest`. Implementations must stop early
/// once `cancel` fires.
pub trait HttpFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        dest: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError>;
}

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self { agent }
    }
}

impl HttpFetcher for UreqFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let response = match self.agent.get(url).set("User-Agent", "pdf-viewer").call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(err) => return Err(FetchError::Transport(err.to_string())),
        };

        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            dest.write_all(&buffer[..read])?;
            total += read as u64;
        }
        dest.flush()?;

        Ok(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Local,
    FreshCache,
    Downloaded,
    StaleCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: PathBuf,
    pub document_hash: String,
    pub origin: SourceOrigin,
}

pub struct DocumentSourceResolver {
    documents_dir: PathBuf,
    freshness: Duration,
    fetcher: Arc<dyn HttpFetcher>,
}

impl DocumentSourceResolver {
    pub fn new(cache_root: &Path, freshness: Duration, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { documents_dir: cache_root.join("documents"), freshness, fetcher }
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.documents_dir.join(format!("{}.pdf", document_hash(url)))
    }

    pub fn resolve(
        &self,
        locator: &SourceLocator,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ViewerError> {
        match locator {
            SourceLocator::File(path) => {
                check_readable(path)?;
                Ok(ResolvedSource {
                    path: path.clone(),
                    document_hash: locator.document_hash(),
                    origin: SourceOrigin::Local,
                })
            }
            SourceLocator::Remote(url) => self.resolve_remote(url, cancel),
        }
    }

    fn resolve_remote(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ViewerError> {
        let cache_path = self.cache_path(url);
        let resolved = |origin| ResolvedSource {
            path: cache_path.clone(),
            document_hash: document_hash(url),
            origin,
        };

        if self.is_fresh(&cache_path) {
            debug!("using fresh cached copy of {url}");
            return Ok(resolved(SourceOrigin::FreshCache));
        }

        match self.download(url, &cache_path, cancel) {
            Ok(()) => Ok(resolved(SourceOrigin::Downloaded)),
            Err(FetchError::Cancelled) => Err(ViewerError::Cancelled),
            Err(err) if cache_path.is_file() => {
                warn!("fetching {url} failed ({err}); using stale cached copy");
                Ok(resolved(SourceOrigin::StaleCache))
            }
            Err(FetchError::Status(code)) => Err(ViewerError::HttpError(code)),
            Err(err) => Err(ViewerError::NetworkError(err.to_string())),
        }
    }

    fn is_fresh(&self, path: &Path) -> bool {
        let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age < self.freshness)
            .unwrap_or(false)
    }

    fn download(
        &self,
        url: &str,
        cache_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        fs::create_dir_all(&self.documents_dir)?;
        let mut temp = NamedTempFile::new_in(&self.documents_dir)?;

        let bytes = self.fetcher.fetch(url, temp.as_file_mut(), cancel)?;
        // A superseded load must not replace the cache entry.
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        temp.persist(cache_path).map_err(|err| FetchError::Io(err.error))?;
        debug!("downloaded {bytes} bytes from {url}");
        Ok(())
    }
}

fn check_readable(path: &Path) -> Result<(), ViewerError> {
    if !path.exists() {
        return Err(ViewerError::FileNotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(ViewerError::FileNotReadable(path.to_path_buf()));
    }
    File::open(path).map_err(|_| ViewerError::FileNotReadable(path.to_path_buf()))?;
    Ok(())
}
