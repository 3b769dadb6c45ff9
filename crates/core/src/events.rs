//! Outbound events and the generation-scoped emitter.

use crate::error::ViewerError;
use pdf_viewer_scheduler::{Generation, GenerationCounter};
use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerEvent {
    #[serde(rename_all = "camelCase")]
    LoadComplete { page_count: u32, page_width: f32, page_height: f32 },
    #[serde(rename_all = "camelCase")]
    PageChange { page: u32, page_count: u32 },
    ScaleChange { scale: f32 },
    Error { message: String, code: String },
    ThumbnailGenerated { page: u32, uri: String },
    #[serde(rename_all = "camelCase")]
    LoadingChange { is_loading: bool },
    /// A page bitmap landed in the cache; rows showing it should rebind.
    PageRendered { page: u32 },
}

impl ViewerEvent {
    pub fn error(err: &ViewerError) -> Self {
        ViewerEvent::Error { message: err.to_string(), code: err.code().to_owned() }
    }
}

/// Receives viewer events. Implementations must not call back into the
/// viewer synchronously.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ViewerEvent);
}

impl<F> EventSink for F
where
    F: Fn(ViewerEvent) + Send + Sync,
{
    fn emit(&self, event: ViewerEvent) {
        self(event)
    }
}

/// Forwards events into a channel, in emission order.
pub struct ChannelSink {
    sender: flume::Sender<ViewerEvent>,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ViewerEvent) {
        // A dropped receiver means the host stopped listening.
        let _ = self.sender.send(event);
    }
}

pub fn channel() -> (ChannelSink, flume::Receiver<ViewerEvent>) {
    let (sender, receiver) = flume::unbounded();
    (ChannelSink { sender }, receiver)
}

/// Drops events produced by superseded generations.
///
/// The staleness check and the delivery happen under one lock, and
/// [`advance`](Self::advance) takes the same lock, so once `advance`
/// returns no event from an older generation can reach the sink.
pub struct EventGate {
    sink: Arc<dyn EventSink>,
    counter: GenerationCounter,
    lock: Mutex<()>,
}

impl EventGate {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, counter: GenerationCounter::new(), lock: Mutex::new(()) }
    }

    pub fn advance(&self) -> Generation {
        let _guard = self.lock.lock().unwrap();
        self.counter.advance()
    }

    pub fn current(&self) -> Generation {
        self.counter.current()
    }

    /// Lock-free staleness check for long-running loops.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.counter.is_current(generation)
    }

    /// Deliver `event` if `generation` is still current. Returns whether it
    /// was delivered.
    pub fn emit(&self, generation: Generation, event: ViewerEvent) -> bool {
        let _guard = self.lock.lock().unwrap();
        if !self.counter.is_current(generation) {
            log::debug!("dropping stale event from generation {generation}: {event:?}");
            return false;
        }
        self.sink.emit(event);
        true
    }

    /// Deliver a command-path event under the current generation.
    pub fn emit_current(&self, event: ViewerEvent) {
        let _guard = self.lock.lock().unwrap();
        self.sink.emit(event);
    }

    /// Run `commit` and then deliver `event`, both only if `generation` is
    /// still current. `commit` must not touch the gate.
    pub fn commit_and_emit<R>(
        &self,
        generation: Generation,
        commit: impl FnOnce() -> R,
        event: impl FnOnce(&R) -> Option<ViewerEvent>,
    ) -> Option<R> {
        let _guard = self.lock.lock().unwrap();
        if !self.counter.is_current(generation) {
            return None;
        }
        let result = commit();
        if let Some(event) = event(&result) {
            self.sink.emit(event);
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_generation_is_dropped() {
        let (sink, events) = channel();
        let gate = EventGate::new(Arc::new(sink));

        let first = gate.advance();
        assert!(gate.emit(first, ViewerEvent::LoadingChange { is_loading: true }));

        let second = gate.advance();
        assert!(!gate.emit(first, ViewerEvent::PageChange { page: 1, page_count: 3 }));
        assert!(gate.emit(second, ViewerEvent::LoadingChange { is_loading: false }));

        let received: Vec<ViewerEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                ViewerEvent::LoadingChange { is_loading: true },
                ViewerEvent::LoadingChange { is_loading: false },
            ]
        );
    }

    #[test]
    fn commit_skipped_for_stale_generation() {
        let (sink, events) = channel();
        let gate = EventGate::new(Arc::new(sink));
        let stale = gate.advance();
        gate.advance();

        let mut committed = false;
        let result = gate.commit_and_emit(stale, || committed = true, |_| None);

        assert!(result.is_none());
        assert!(!committed);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = seen.clone();
        let gate = EventGate::new(Arc::new(move |event: ViewerEvent| {
            store.lock().unwrap().push(event);
        }));

        gate.emit_current(ViewerEvent::ScaleChange { scale: 2.0 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn events_serialize_with_camel_case_tags() {
        let json = serde_json::to_value(ViewerEvent::LoadComplete {
            page_count: 3,
            page_width: 612.0,
            page_height: 792.0,
        })
        .unwrap();

        assert_eq!(json["type"], "loadComplete");
        assert_eq!(json["pageCount"], 3);
        assert_eq!(
            serde_json::to_value(ViewerEvent::error(&ViewerError::NotLoaded)).unwrap()["code"],
            "NOT_LOADED"
        );
    }
}
