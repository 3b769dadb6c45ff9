use pdf_engine::PdfEngineError;
use std::path::PathBuf;

/// Every failure the viewer reports to its host.
///
/// Each variant maps to a stable machine-readable [`code`](ViewerError::code);
/// the `Display` text is the human-readable message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewerError {
    #[error("invalid document source: {0}")]
    InvalidSource(String),
    #[error("unsupported source scheme: {0}")]
    UnsupportedScheme(String),
    #[error("file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("file is not readable: {}", .0.display())]
    FileNotReadable(PathBuf),
    #[error("failed to open PDF: {0}")]
    InvalidFile(String),
    #[error("document is password protected")]
    PasswordProtected,
    #[error("document has no pages")]
    EmptyDocument,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("HTTP error {0}")]
    HttpError(u16),
    #[error("no document loaded")]
    NotLoaded,
    #[error("invalid page index {index} (page count {page_count})")]
    InvalidPageIndex { index: i64, page_count: u32 },
    #[error("zoom is disabled")]
    ZoomDisabled,
    #[error("out of memory while rendering at scale {scale:.1}")]
    OutOfMemory { scale: f32 },
    #[error("failed to save thumbnail: {0}")]
    ThumbnailSaveFailed(String),
    /// Work superseded by a newer load or teardown. Never surfaced as an event.
    #[error("operation cancelled")]
    Cancelled,
}

impl ViewerError {
    pub fn code(&self) -> &'static str {
        match self {
            ViewerError::InvalidSource(_) => "INVALID_SOURCE",
            ViewerError::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            ViewerError::FileNotFound(_) => "FILE_NOT_FOUND",
            ViewerError::FileNotReadable(_) => "FILE_NOT_READABLE",
            ViewerError::InvalidFile(_) => "INVALID_FILE",
            ViewerError::PasswordProtected => "PASSWORD_PROTECTED",
            ViewerError::EmptyDocument => "EMPTY_DOCUMENT",
            ViewerError::NetworkError(_) => "NETWORK_ERROR",
            ViewerError::HttpError(_) => "HTTP_ERROR",
            ViewerError::NotLoaded => "NOT_LOADED",
            ViewerError::InvalidPageIndex { .. } => "INVALID_PAGE_INDEX",
            ViewerError::ZoomDisabled => "ZOOM_DISABLED",
            ViewerError::OutOfMemory { .. } => "OUT_OF_MEMORY",
            ViewerError::ThumbnailSaveFailed(_) => "THUMBNAIL_SAVE_FAILED",
            ViewerError::Cancelled => "CANCELLED",
        }
    }
}

impl From<PdfEngineError> for ViewerError {
    fn from(err: PdfEngineError) -> Self {
        match err {
            PdfEngineError::PasswordProtected => ViewerError::PasswordProtected,
            PdfEngineError::EmptyDocument => ViewerError::EmptyDocument,
            // Engine-level OOM has no view transform; callers that know the
            // current scale build the variant themselves.
            PdfEngineError::OutOfMemory { .. } => ViewerError::OutOfMemory { scale: 1.0 },
            PdfEngineError::Parse(err) => ViewerError::InvalidFile(err.to_string()),
            other => ViewerError::InvalidFile(other.to_string()),
        }
    }
}
