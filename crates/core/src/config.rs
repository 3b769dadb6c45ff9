//! Viewer configuration.
//!
//! Every field has a default, so partial JSON files are accepted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insets {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Vertical gap between pages, in view units.
    pub spacing: f32,
    pub enable_zoom: bool,
    pub min_scale: f32,
    pub max_scale: f32,
    pub shows_activity_indicator: bool,
    pub insets: Insets,

    /// Rendered bitmap width divided by row width.
    pub quality_multiplier: f32,
    /// Upper bound for either bitmap dimension, in pixels.
    pub max_texture_size: u32,
    pub preload_radius: u32,
    pub render_workers: usize,
    /// Share of available memory given to the bitmap cache.
    pub bitmap_cache_fraction: f64,

    pub thumbnail_width: u32,
    pub thumbnail_quality: u8,
    pub thumbnail_concurrency: usize,
    pub thumbnail_batch_delay_ms: u64,

    pub metadata_initial_batch: u32,
    pub metadata_fast_delay_ms: u64,
    pub metadata_slow_delay_ms: u64,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub cache_freshness_secs: u64,

    pub settle_debounce_ms: u64,
    pub cache_root: PathBuf,
    pub purge_thumbnails_on_background: bool,
    pub persist_last_page: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            spacing: 10.0,
            enable_zoom: true,
            min_scale: 1.0,
            max_scale: 3.0,
            shows_activity_indicator: true,
            insets: Insets::default(),
            quality_multiplier: 1.5,
            max_texture_size: 4096,
            preload_radius: 2,
            render_workers: 2,
            bitmap_cache_fraction: 0.25,
            thumbnail_width: 120,
            thumbnail_quality: 85,
            thumbnail_concurrency: 4,
            thumbnail_batch_delay_ms: 10,
            metadata_initial_batch: 10,
            metadata_fast_delay_ms: 5,
            metadata_slow_delay_ms: 25,
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            cache_freshness_secs: 3600,
            settle_debounce_ms: 150,
            cache_root: default_cache_root(),
            purge_thumbnails_on_background: true,
            persist_last_page: true,
        }
    }
}

pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("pdf-viewer")
}

impl ViewerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.min_scale > 0.0) {
            return invalid(format!("min_scale must be positive, got {}", self.min_scale));
        }
        if self.min_scale > self.max_scale {
            return invalid(format!(
                "min_scale {} exceeds max_scale {}",
                self.min_scale, self.max_scale
            ));
        }
        if !(self.quality_multiplier > 0.0) {
            return invalid("quality_multiplier must be positive".to_owned());
        }
        if self.max_texture_size == 0 {
            return invalid("max_texture_size must be non-zero".to_owned());
        }
        if self.thumbnail_width == 0 {
            return invalid("thumbnail_width must be non-zero".to_owned());
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            return invalid(format!("thumbnail_quality must be 1..=100, got {}", self.thumbnail_quality));
        }
        if self.thumbnail_concurrency == 0 || self.render_workers == 0 {
            return invalid("worker counts must be non-zero".to_owned());
        }
        if !(self.bitmap_cache_fraction > 0.0 && self.bitmap_cache_fraction <= 1.0) {
            return invalid("bitmap_cache_fraction must be in (0, 1]".to_owned());
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn cache_freshness(&self) -> Duration {
        Duration::from_secs(self.cache_freshness_secs)
    }

    pub fn settle_debounce(&self) -> Duration {
        Duration::from_millis(self.settle_debounce_ms)
    }

    pub fn thumbnail_batch_delay(&self) -> Duration {
        Duration::from_millis(self.thumbnail_batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ViewerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.quality_multiplier, 1.5);
        assert_eq!(config.max_texture_size, 4096);
        assert_eq!(config.thumbnail_width, 120);
        assert!(config.cache_root.ends_with("pdf-viewer"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ViewerConfig::from_json_str(
            r#"{ "max_scale": 4.0, "insets": { "top": 12 }, "enable_zoom": false }"#,
        )
        .unwrap();

        assert_eq!(config.max_scale, 4.0);
        assert_eq!(config.min_scale, 1.0);
        assert_eq!(config.insets.top, 12.0);
        assert_eq!(config.insets.left, 0.0);
        assert!(!config.enable_zoom);
    }

    #[test]
    fn rejects_inverted_scale_bounds() {
        let err = ViewerConfig::from_json_str(r#"{ "min_scale": 3.0, "max_scale": 2.0 }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_thumbnail_quality() {
        let config = ViewerConfig { thumbnail_quality: 0, ..ViewerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("viewer.json");
        fs::write(&path, r#"{ "preload_radius": 4 }"#).unwrap();

        assert_eq!(ViewerConfig::from_json_file(&path).unwrap().preload_radius, 4);
        assert!(matches!(
            ViewerConfig::from_json_file(temp.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
