//! Document engine capability consumed by the viewer core.
//!
//! The viewer never parses PDF itself: it opens a source, asks for page
//! count and page bounds, rasterizes pages and finally closes the document,
//! all through [`PdfEngine`]. Engines are not expected to be thread safe;
//! callers serialize every call through one mutex per opened document.

use image::{ImageBuffer, Rgba};
use log::debug;
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US-Letter in points, used when a page carries no usable MediaBox.
pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

const BORDER: Rgba<u8> = Rgba([220, 220, 220, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocId(u64);

impl DocId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Height divided by width, falling back to Letter for degenerate boxes.
    pub fn aspect(&self) -> f32 {
        if self.width_pt <= 0.0 || self.height_pt <= 0.0 {
            return LETTER.height_pt / LETTER.width_pt;
        }
        self.height_pt / self.width_pt
    }
}

/// Rasterize one page to an exact pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("document is password protected")]
    PasswordProtected,
    #[error("document has no pages")]
    EmptyDocument,
    #[error("not enough memory for a {width_px}x{height_px} raster")]
    OutOfMemory { width_px: u32, height_px: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine: Send {
    fn open(&mut self, source: OpenSource) -> Result<DocId, PdfEngineError>;
    fn page_count(&self, handle: DocId) -> Result<u32, PdfEngineError>;
    fn page_size(&self, handle: DocId, page_index: u32) -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocId,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocId) -> Result<(), PdfEngineError>;
}

/// Allocate a white RGBA buffer, reporting allocation failure as
/// [`PdfEngineError::OutOfMemory`] instead of aborting the process.
pub fn allocate_raster(width_px: u32, height_px: u32) -> Result<RgbaImage, PdfEngineError> {
    let oom = PdfEngineError::OutOfMemory { width_px, height_px };
    let len = (width_px as usize)
        .checked_mul(height_px as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(PdfEngineError::OutOfMemory { width_px, height_px })?;

    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| oom)?;
    buffer.resize(len, 255);

    RgbaImage::from_raw(width_px, height_px, buffer)
        .ok_or_else(|| PdfEngineError::Backend("raster buffer size mismatch".to_owned()))
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
}

/// Metadata-only backend: reads page boxes with lopdf and produces blank
/// page rasters. Good enough for headless use and layout; real drawing
/// comes from the `pdfium` backend.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocId, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::PasswordProtected);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
                })
                .unwrap_or(LETTER);

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::EmptyDocument);
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocId) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocId, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocId(self.next_handle);
        debug!("opened document {} with {} pages", handle.raw(), page_sizes.len());
        self.docs.insert(handle, DocumentRecord { page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocId) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(&self, handle: DocId, page_index: u32) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn render_page(
        &self,
        handle: DocId,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        self.page_size(handle, request.page_index)?;

        let width = request.width_px.max(1);
        let height = request.height_px.max(1);
        let mut image = allocate_raster(width, height)?;

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, BORDER);
                image.put_pixel(x, height - 1, BORDER);
            }
            for y in 0..height {
                image.put_pixel(0, y, BORDER);
                image.put_pixel(width - 1, y, BORDER);
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocId) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    pub struct PdfiumEngine {
        pdfium: &'static Pdfium,
        next_handle: u64,
        docs: HashMap<DocId, PdfDocument<'static>>,
    }

    // Every call on an opened document is serialized by the owning handle's
    // mutex, so the engine may move between worker threads.
    unsafe impl Send for PdfiumEngine {}

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err:?}"))
            })?;

            Ok(Self {
                pdfium: Box::leak(Box::new(Pdfium::new(bindings))),
                next_handle: 0,
                docs: HashMap::new(),
            })
        }

        fn document(&self, handle: DocId) -> Result<&PdfDocument<'static>, PdfEngineError> {
            self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
        }

        fn page(&self, handle: DocId, page_index: u32) -> Result<PdfPage<'static>, PdfEngineError> {
            let document = self.document(handle)?;
            let page_count = document.pages().len() as u32;
            if page_index >= page_count {
                return Err(PdfEngineError::PageOutOfRange { page: page_index, page_count });
            }
            document.pages().get(page_index as u16).map_err(map_error)
        }
    }

    fn map_error(err: PdfiumError) -> PdfEngineError {
        match err {
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                PdfEngineError::PasswordProtected
            }
            other => PdfEngineError::Backend(format!("{other:?}")),
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocId, PdfEngineError> {
            let document = match source {
                OpenSource::Path(path) => self.pdfium.load_pdf_from_file(&path, None),
                OpenSource::Bytes(bytes) => self.pdfium.load_pdf_from_byte_vec(bytes, None),
            }
            .map_err(map_error)?;

            if document.pages().len() == 0 {
                return Err(PdfEngineError::EmptyDocument);
            }

            self.next_handle += 1;
            let handle = DocId(self.next_handle);
            self.docs.insert(handle, document);
            Ok(handle)
        }

        fn page_count(&self, handle: DocId) -> Result<u32, PdfEngineError> {
            Ok(self.document(handle)?.pages().len() as u32)
        }

        fn page_size(&self, handle: DocId, page_index: u32) -> Result<PageSize, PdfEngineError> {
            let page = self.page(handle, page_index)?;
            Ok(PageSize { width_pt: page.width().value, height_pt: page.height().value })
        }

        fn render_page(
            &self,
            handle: DocId,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let page = self.page(handle, request.page_index)?;
            let width = request.width_px.max(1);
            let height = request.height_px.max(1);

            // Reserve up front so an oversized raster reports OOM.
            drop(allocate_raster(width, height)?);

            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32);
            let bitmap = page.render_with_config(&config).map_err(map_error)?;

            RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes().to_vec())
                .ok_or_else(|| PdfEngineError::Backend("unexpected bitmap size".to_owned()))
        }

        fn close(&mut self, handle: DocId) -> Result<(), PdfEngineError> {
            self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
mod tests {
    use super::testing::{sample_pdf, sample_pdf_with_sizes};
    use super::*;

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(sample_pdf(3))).expect("open should succeed");

        assert_eq!(engine.page_count(handle).expect("count should succeed"), 3);
    }

    #[test]
    fn reads_media_box_per_page() {
        let mut engine = LopdfEngine::new();
        let bytes = sample_pdf_with_sizes(&[(612.0, 792.0), (842.0, 595.0)]);
        let handle = engine.open(OpenSource::Bytes(bytes)).expect("open should succeed");

        let landscape = engine.page_size(handle, 1).expect("size should succeed");
        assert_eq!(landscape, PageSize { width_pt: 842.0, height_pt: 595.0 });
        assert!(landscape.aspect() < 1.0);
    }

    #[test]
    fn render_page_produces_requested_size() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(sample_pdf(1))).expect("open should succeed");

        let image = engine
            .render_page(handle, RenderRequest { page_index: 0, width_px: 90, height_px: 120 })
            .expect("render should succeed");

        assert_eq!(image.dimensions(), (90, 120));
        assert_eq!(*image.get_pixel(0, 0), BORDER);
        assert_eq!(*image.get_pixel(45, 60), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn page_out_of_range_is_reported() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(sample_pdf(2))).expect("open should succeed");

        let err = engine.page_size(handle, 2).expect_err("page 2 should not exist");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 2, page_count: 2 }));
    }

    #[test]
    fn encrypted_documents_are_rejected() {
        let mut bytes = sample_pdf(1);
        bytes.extend_from_slice(b"\n/Encrypt 5 0 R\n");

        let err = LopdfEngine::new().open(OpenSource::Bytes(bytes)).expect_err("should fail");
        assert!(matches!(err, PdfEngineError::PasswordProtected));
    }

    #[test]
    fn garbage_fails_to_parse() {
        let err = LopdfEngine::new()
            .open(OpenSource::Bytes(b"not a pdf".to_vec()))
            .expect_err("should fail");
        assert!(matches!(err, PdfEngineError::Parse(_)));
    }

    #[test]
    fn oversized_raster_reports_out_of_memory() {
        let err = allocate_raster(u32::MAX, u32::MAX).expect_err("should not allocate");
        assert!(matches!(err, PdfEngineError::OutOfMemory { .. }));
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = LopdfEngine::new();
        let err = engine.page_count(DocId(999)).expect_err("should fail for unknown handle");

        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));
    }

    #[test]
    fn close_releases_document() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(sample_pdf(1))).expect("open should succeed");

        engine.close(handle).expect("close should succeed");
        assert!(engine.close(handle).is_err());
    }
}
