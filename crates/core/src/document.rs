//! The opened document and its engine lock.

use crate::error::ViewerError;
use crate::source::ResolvedSource;
use log::{debug, warn};
use pdf_engine::{
    DocId, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
};
use pdf_viewer_scheduler::Generation;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Builds a fresh engine for every document the viewer opens.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn PdfEngine> + Send + Sync>;

/// pdfium when built with the `pdfium` feature and the library binds,
/// otherwise the lopdf backend.
pub fn default_engine_factory() -> EngineFactory {
    Arc::new(|| {
        #[cfg(feature = "pdfium")]
        {
            match pdf_engine::pdfium_backend::PdfiumEngine::from_system_library() {
                Ok(engine) => return Box::new(engine) as Box<dyn PdfEngine>,
                Err(err) => warn!("{err}; falling back to lopdf"),
            }
        }
        Box::new(pdf_engine::default_engine()) as Box<dyn PdfEngine>
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Empty,
    Opening,
    Ready,
    Closed,
}

/// One opened document. Every engine call goes through the same mutex, so
/// page renders, thumbnails and measurements never overlap.
///
/// Dropping the last reference closes the document.
pub struct DocumentHandle {
    engine: Mutex<Box<dyn PdfEngine>>,
    doc: DocId,
    page_count: u32,
    document_hash: String,
    generation: Generation,
}

impl DocumentHandle {
    pub fn open(
        factory: &EngineFactory,
        source: &ResolvedSource,
        generation: Generation,
    ) -> Result<Self, ViewerError> {
        let mut engine = factory();
        let doc = engine.open(OpenSource::Path(source.path.clone())).map_err(|err| match err {
            PdfEngineError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                ViewerError::FileNotFound(source.path.clone())
            }
            PdfEngineError::Io(_) => ViewerError::FileNotReadable(source.path.clone()),
            other => ViewerError::from(other),
        })?;

        let page_count = match engine.page_count(doc) {
            Ok(0) => Err(ViewerError::EmptyDocument),
            Ok(count) => Ok(count),
            Err(err) => Err(ViewerError::from(err)),
        };
        let page_count = match page_count {
            Ok(count) => count,
            Err(err) => {
                if let Err(close_err) = engine.close(doc) {
                    warn!("closing rejected document failed: {close_err}");
                }
                return Err(err);
            }
        };

        debug!("document {} ready with {page_count} pages (generation {generation})", source.document_hash);

        Ok(Self {
            engine: Mutex::new(engine),
            doc,
            page_count,
            document_hash: source.document_hash.clone(),
            generation,
        })
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn document_hash(&self) -> &str {
        &self.document_hash
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.engine().page_size(self.doc, page_index)
    }

    pub fn render(&self, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
        self.engine().render_page(self.doc, request)
    }

    // A panic inside the engine must not wedge every later page.
    fn engine(&self) -> MutexGuard<'_, Box<dyn PdfEngine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        let doc = self.doc;
        if let Err(err) = self.engine().close(doc) {
            warn!("closing document {} failed: {err}", self.document_hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceOrigin;
    use pdf_engine::testing::{sample_pdf, FakeEngine, FakeScript, RenderRecorder};
    use std::path::PathBuf;

    fn resolved(path: PathBuf) -> ResolvedSource {
        ResolvedSource { path, document_hash: "hash".into(), origin: SourceOrigin::Local }
    }

    fn fake_factory(script: FakeScript, recorder: RenderRecorder) -> EngineFactory {
        Arc::new(move || Box::new(FakeEngine::new(script.clone(), recorder.clone())) as Box<dyn PdfEngine>)
    }

    #[test]
    fn opens_with_default_engine() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("doc.pdf");
        std::fs::write(&path, sample_pdf(4)).unwrap();

        let handle = DocumentHandle::open(&default_engine_factory(), &resolved(path), 1).unwrap();
        assert_eq!(handle.page_count(), 4);
        assert_eq!(handle.page_size(0).unwrap(), pdf_engine::LETTER);
        assert_eq!(handle.generation(), 1);
    }

    #[test]
    fn invalid_bytes_are_invalid_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("junk.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();

        let err = DocumentHandle::open(&default_engine_factory(), &resolved(path), 1).err().unwrap();
        assert_eq!(err.code(), "INVALID_FILE");
    }

    #[test]
    fn password_protected_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("locked.pdf");
        std::fs::write(&path, b"x").unwrap();
        let factory = fake_factory(FakeScript::pages(2).password_protected(), RenderRecorder::default());

        let err = DocumentHandle::open(&factory, &resolved(path), 1).err().unwrap();
        assert_eq!(err, ViewerError::PasswordProtected);
    }

    #[test]
    fn empty_document_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty.pdf");
        std::fs::write(&path, b"x").unwrap();
        let factory = fake_factory(FakeScript::pages(0), RenderRecorder::default());

        let err = DocumentHandle::open(&factory, &resolved(path), 1).err().unwrap();
        assert_eq!(err, ViewerError::EmptyDocument);
    }

    #[test]
    fn drop_closes_document() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("doc.pdf");
        std::fs::write(&path, b"x").unwrap();
        let recorder = RenderRecorder::default();
        let factory = fake_factory(FakeScript::pages(3), recorder.clone());

        let handle = DocumentHandle::open(&factory, &resolved(path), 1).unwrap();
        assert_eq!(recorder.opens(), 1);
        drop(handle);
        assert_eq!(recorder.closes(), 1);
    }
}
