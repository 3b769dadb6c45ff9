use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use pdf_viewer_cache::ThumbnailStore;
use pdf_viewer_core::{
    channel, file_uri, LastPageStore, PdfViewer, ThumbnailRequest, ViewerConfig, ViewerEvent,
};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Parser)]
#[command(name = "pdf-viewer-cli")]
#[command(about = "Headless PDF viewer")]
pub struct Cli {
    /// Cache directory for downloads, thumbnails and reading positions.
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// JSON viewer configuration.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a document and print its metadata as JSON.
    Info {
        /// File path, file:// or http(s):// URL.
        #[arg(value_name = "SOURCE")]
        source: String,
    },
    /// Generate JPEG thumbnails into the cache and print their locations.
    Thumbnails {
        #[arg(value_name = "SOURCE")]
        source: String,
        /// 0-based page; every page when omitted.
        #[arg(long)]
        page: Option<i64>,
    },
    /// Remove cached downloads, thumbnails and reading positions.
    ClearCache,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    source: String,
    page_count: u32,
    page_width: f32,
    page_height: f32,
    current_page: u32,
}

#[derive(Debug, Serialize)]
struct ThumbnailOutput {
    page: u32,
    uri: String,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    cache_dir: String,
    removed: Vec<String>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Info { source } => run_info(config, &source),
        Commands::Thumbnails { source, page } => run_thumbnails(config, &source, page),
        Commands::ClearCache => run_clear_cache(&config),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    // Only fails when a logger is already installed.
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never);
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<ViewerConfig> {
    let config = match path {
        Some(path) => ViewerConfig::from_json_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    Ok(match cache_dir {
        Some(dir) => config.with_cache_root(dir),
        None => config,
    })
}

/// Bare paths become `file://` locators; anything with a scheme passes through.
fn to_locator(source: &str) -> String {
    if source.contains("://") {
        return source.to_owned();
    }
    let path = Path::new(source);
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| {
        std::env::current_dir().map(|dir| dir.join(path)).unwrap_or_else(|_| path.to_path_buf())
    });
    file_uri(&absolute)
}

struct Session {
    viewer: PdfViewer,
    events: flume::Receiver<ViewerEvent>,
}

impl Session {
    fn open(config: ViewerConfig, source: &str) -> Result<Self> {
        let (sink, events) = channel();
        let viewer = PdfViewer::builder(config)
            .event_sink(Arc::new(sink))
            .build()
            .context("invalid viewer configuration")?;

        let locator = to_locator(source);
        debug!("loading {locator}");
        viewer.load(&locator);

        let session = Self { viewer, events };
        session.wait_for(|event| matches!(event, ViewerEvent::LoadComplete { .. }))?;
        Ok(session)
    }

    /// Block until `done` accepts an event. Error events abort.
    fn wait_for(&self, mut done: impl FnMut(&ViewerEvent) -> bool) -> Result<ViewerEvent> {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let event = self
                .events
                .recv_deadline(deadline)
                .context("timed out waiting for the viewer")?;
            if let ViewerEvent::Error { message, code } = &event {
                bail!("{message} ({code})");
            }
            if done(&event) {
                return Ok(event);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.viewer.teardown();
    }
}

fn run_info(config: ViewerConfig, source: &str) -> Result<()> {
    let session = Session::open(config, source)?;
    let info = session.viewer.document_info().context("document is not loaded")?;

    let payload = InfoOutput {
        source: to_locator(source),
        page_count: info.page_count,
        page_width: info.page_width,
        page_height: info.page_height,
        current_page: info.current_page,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_thumbnails(config: ViewerConfig, source: &str, page: Option<i64>) -> Result<()> {
    let session = Session::open(config, source)?;
    let viewer = &session.viewer;

    let expected = match page {
        Some(page) => {
            if let ThumbnailRequest::Cached(path) = viewer.generate_thumbnail(page)? {
                debug!("page {page} served from {}", path.display());
            }
            1
        }
        None => {
            viewer.generate_all_thumbnails()?;
            viewer.document_info().map(|info| info.page_count).unwrap_or(0) as usize
        }
    };

    let mut thumbnails = Vec::with_capacity(expected);
    while thumbnails.len() < expected {
        if let ViewerEvent::ThumbnailGenerated { page, uri } = session
            .wait_for(|event| matches!(event, ViewerEvent::ThumbnailGenerated { .. }))?
        {
            thumbnails.push(ThumbnailOutput { page, uri });
        }
    }
    thumbnails.sort_by_key(|thumbnail| thumbnail.page);

    println!("{}", serde_json::to_string_pretty(&thumbnails)?);
    Ok(())
}

fn run_clear_cache(config: &ViewerConfig) -> Result<()> {
    let root = &config.cache_root;
    let mut removed = Vec::new();

    let thumbnails = ThumbnailStore::new(root);
    if thumbnails.root().exists() {
        removed.push(thumbnails.root().display().to_string());
    }
    thumbnails.purge_disk().context("failed to purge thumbnails")?;

    let documents = root.join("documents");
    if remove_if_exists(&documents, |p| fs::remove_dir_all(p))? {
        removed.push(documents.display().to_string());
    }
    let positions = LastPageStore::new(root).path().to_path_buf();
    if remove_if_exists(&positions, |p| fs::remove_file(p))? {
        removed.push(positions.display().to_string());
    }

    let payload = ClearOutput { cache_dir: root.display().to_string(), removed };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn remove_if_exists(path: &Path, remove: fn(&Path) -> io::Result<()>) -> Result<bool> {
    match remove(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
