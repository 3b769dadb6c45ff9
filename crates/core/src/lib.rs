//! PDF Viewer Core Library
//!
//! Headless PDF viewing: source resolution, document lifecycle, page layout,
//! background rendering into a bounded bitmap cache, persistent thumbnails
//! and zoom state. A [`PdfViewer`] reports asynchronous outcomes as
//! [`ViewerEvent`]s through an [`EventSink`].
//!
//! ```no_run
//! use pdf_viewer_core::{channel, PdfViewer, ViewerConfig, ViewerEvent};
//! use std::sync::Arc;
//!
//! let (sink, events) = channel();
//! let viewer = PdfViewer::builder(ViewerConfig::default())
//!     .event_sink(Arc::new(sink))
//!     .build()?;
//!
//! viewer.load("file:///tmp/manual.pdf");
//! for event in events.iter() {
//!     if let ViewerEvent::LoadComplete { page_count, .. } = event {
//!         println!("{page_count} pages");
//!         break;
//!     }
//! }
//! # Ok::<(), pdf_viewer_core::ConfigError>(())
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod layout;
pub mod metadata;
pub mod persistence;
pub mod render;
pub mod source;
pub mod thumbnail;
pub mod viewer;
pub mod zoom;

#[cfg(test)]
mod test_support;

pub use config::{default_cache_root, ConfigError, Insets, ViewerConfig};
pub use document::{default_engine_factory, DocumentHandle, DocumentState, EngineFactory};
pub use error::ViewerError;
pub use events::{channel, ChannelSink, EventGate, EventSink, ViewerEvent};
pub use layout::PageLayout;
pub use metadata::PageMetadataStore;
pub use persistence::{LastPageStore, PersistenceError};
pub use render::{target_size, RenderScheduler, RenderSettings};
pub use source::{
    document_hash, file_uri, DocumentSourceResolver, FetchError, HttpFetcher, ResolvedSource,
    SourceLocator, SourceOrigin, UreqFetcher,
};
pub use thumbnail::{ThumbnailPipeline, ThumbnailRequest, ThumbnailSettings};
pub use viewer::{DocumentInfo, PdfViewer, ViewerBuilder, ViewerStats};
pub use zoom::{Point, ScaleState};
