//! Shared fixtures for the core crate's unit tests.

use crate::document::{DocumentHandle, EngineFactory};
use crate::events::ViewerEvent;
use crate::source::{ResolvedSource, SourceOrigin};
use pdf_engine::testing::{FakeEngine, FakeScript, RenderRecorder};
use pdf_engine::PdfEngine;
use pdf_viewer_scheduler::Generation;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn fake_factory(script: FakeScript, recorder: RenderRecorder) -> EngineFactory {
    Arc::new(move || Box::new(FakeEngine::new(script.clone(), recorder.clone())) as Box<dyn PdfEngine>)
}

/// Writes a placeholder file (the fake engine ignores contents) and opens it.
pub fn open_fake(
    dir: &Path,
    script: FakeScript,
    recorder: RenderRecorder,
    generation: Generation,
) -> Arc<DocumentHandle> {
    let path = dir.join(format!("doc-{generation}.pdf"));
    std::fs::write(&path, b"%PDF-fake").unwrap();
    let source = ResolvedSource {
        path,
        document_hash: format!("hash-{generation}"),
        origin: SourceOrigin::Local,
    };
    Arc::new(DocumentHandle::open(&fake_factory(script, recorder), &source, generation).unwrap())
}

/// Polls `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Receives until an event matches `predicate`, skipping the rest. Gives up
/// after five seconds.
pub fn wait_for_event(
    events: &flume::Receiver<ViewerEvent>,
    mut predicate: impl FnMut(&ViewerEvent) -> bool,
) -> Option<ViewerEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Ok(event) = events.recv_deadline(deadline) {
        if predicate(&event) {
            return Some(event);
        }
    }
    None
}
