//! Fixtures for crates that drive a [`PdfEngine`] in tests.

use crate::{
    allocate_raster, DocId, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest,
    RgbaImage, LETTER,
};
use lopdf::{dictionary, Document, Object};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A Letter-sized document with `pages` blank pages.
pub fn sample_pdf(pages: usize) -> Vec<u8> {
    let sizes = vec![(LETTER.width_pt, LETTER.height_pt); pages];
    sample_pdf_with_sizes(&sizes)
}

pub fn sample_pdf_with_sizes(sizes: &[(f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = sizes
        .iter()
        .map(|&(width, height)| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            });
            page_id.into()
        })
        .collect();

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save sample pdf");
    out
}

/// Scripted behaviour for [`FakeEngine`]. Clones share the one-shot
/// failure sets, so a fault consumed by one engine stays consumed.
#[derive(Debug, Clone)]
pub struct FakeScript {
    page_sizes: Vec<PageSize>,
    render_delay: Duration,
    open_delay: Duration,
    password_protected: bool,
    fail_once: Arc<Mutex<HashSet<u32>>>,
    oom_once: Arc<Mutex<HashSet<u32>>>,
}

impl FakeScript {
    pub fn pages(count: usize) -> Self {
        Self {
            page_sizes: vec![LETTER; count],
            render_delay: Duration::ZERO,
            open_delay: Duration::ZERO,
            password_protected: false,
            fail_once: Arc::new(Mutex::new(HashSet::new())),
            oom_once: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_page_size(mut self, page: usize, width_pt: f32, height_pt: f32) -> Self {
        if let Some(size) = self.page_sizes.get_mut(page) {
            *size = PageSize { width_pt, height_pt };
        }
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn password_protected(mut self) -> Self {
        self.password_protected = true;
        self
    }

    pub fn fail_once(self, page: u32) -> Self {
        self.fail_once.lock().expect("fake script poisoned").insert(page);
        self
    }

    pub fn oom_once(self, page: u32) -> Self {
        self.oom_once.lock().expect("fake script poisoned").insert(page);
        self
    }
}

/// Counters shared between a test and every engine it hands out.
#[derive(Debug, Clone, Default)]
pub struct RenderRecorder {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    renders: Arc<Mutex<Vec<RenderRequest>>>,
    size_queries: Arc<Mutex<HashMap<u32, usize>>>,
}

impl RenderRecorder {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> Vec<RenderRequest> {
        self.renders.lock().expect("recorder poisoned").clone()
    }

    pub fn render_count(&self, page: u32) -> usize {
        self.renders().iter().filter(|request| request.page_index == page).count()
    }

    pub fn size_queries(&self, page: u32) -> usize {
        self.size_queries.lock().expect("recorder poisoned").get(&page).copied().unwrap_or(0)
    }
}

/// In-memory engine that ignores source contents and follows a [`FakeScript`].
#[derive(Debug)]
pub struct FakeEngine {
    script: FakeScript,
    recorder: RenderRecorder,
    next_handle: u64,
    open: HashSet<DocId>,
}

impl FakeEngine {
    pub fn new(script: FakeScript, recorder: RenderRecorder) -> Self {
        Self { script, recorder, next_handle: 0, open: HashSet::new() }
    }

    fn check(&self, handle: DocId) -> Result<(), PdfEngineError> {
        if self.open.contains(&handle) {
            Ok(())
        } else {
            Err(PdfEngineError::InvalidHandle(handle.raw()))
        }
    }

    fn check_page(&self, page: u32) -> Result<(), PdfEngineError> {
        let page_count = self.script.page_sizes.len() as u32;
        if page < page_count {
            Ok(())
        } else {
            Err(PdfEngineError::PageOutOfRange { page, page_count })
        }
    }
}

impl PdfEngine for FakeEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocId, PdfEngineError> {
        if let OpenSource::Path(path) = &source {
            if !path.exists() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )
                .into());
            }
        }
        if !self.script.open_delay.is_zero() {
            thread::sleep(self.script.open_delay);
        }
        if self.script.password_protected {
            return Err(PdfEngineError::PasswordProtected);
        }
        if self.script.page_sizes.is_empty() {
            return Err(PdfEngineError::EmptyDocument);
        }

        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        self.next_handle += 1;
        let handle = DocId(self.next_handle);
        self.open.insert(handle);
        Ok(handle)
    }

    fn page_count(&self, handle: DocId) -> Result<u32, PdfEngineError> {
        self.check(handle)?;
        Ok(self.script.page_sizes.len() as u32)
    }

    fn page_size(&self, handle: DocId, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.check(handle)?;
        self.check_page(page_index)?;
        *self
            .recorder
            .size_queries
            .lock()
            .expect("recorder poisoned")
            .entry(page_index)
            .or_default() += 1;
        Ok(self.script.page_sizes[page_index as usize])
    }

    fn render_page(
        &self,
        handle: DocId,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        self.check(handle)?;
        self.check_page(request.page_index)?;

        if !self.script.render_delay.is_zero() {
            thread::sleep(self.script.render_delay);
        }
        self.recorder.renders.lock().expect("recorder poisoned").push(request);

        if self.script.oom_once.lock().expect("fake script poisoned").remove(&request.page_index) {
            return Err(PdfEngineError::OutOfMemory {
                width_px: request.width_px,
                height_px: request.height_px,
            });
        }
        if self.script.fail_once.lock().expect("fake script poisoned").remove(&request.page_index)
        {
            return Err(PdfEngineError::Backend(format!(
                "scripted failure on page {}",
                request.page_index
            )));
        }

        allocate_raster(request.width_px.max(1), request.height_px.max(1))
    }

    fn close(&mut self, handle: DocId) -> Result<(), PdfEngineError> {
        if self.open.remove(&handle) {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(PdfEngineError::InvalidHandle(handle.raw()))
        }
    }
}
