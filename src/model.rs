//! Persisted records: tiles, photos, the run configuration and snapshots.
//!
//! All records serialize with camelCase field names so the admin API speaks
//! the same vocabulary as the stored documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MosaicError;

/// An RGB triple, each channel in `0..=255`.
pub type Rgb = [u8; 3];

/// Identifier of a photo in the pool.
pub type PhotoId = i64;

/// Mosaic key used when a request does not name one.
pub const DEFAULT_MOSAIC_KEY: &str = "default";

// =============================================================================
// Tile
// =============================================================================

/// One grid cell of a mosaic.
///
/// Unique per `(mosaic_key, row, col)`. The `id` is assigned by the store on
/// insert; freshly built tiles carry `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub id: i64,
    pub mosaic_key: String,
    pub row: u32,
    pub col: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub color: Rgb,
    pub matched_photo: Option<PhotoId>,
    pub matched_url: String,
}

impl Tile {
    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }
}

/// A match assignment persisted in one bulk write after the matching pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatch {
    pub tile_id: i64,
    pub photo_id: PhotoId,
    pub url: String,
}

// =============================================================================
// Photo
// =============================================================================

/// A photograph in the candidate pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: PhotoId,
    pub image_url: String,
    pub dominant_color: Option<Rgb>,
    #[serde(default)]
    pub hidden: bool,
}

impl Photo {
    /// Visible photos with a known dominant color take part in matching.
    pub fn is_eligible(&self) -> bool {
        !self.hidden && self.dominant_color.is_some()
    }
}

// =============================================================================
// Configuration
// =============================================================================

pub const DEFAULT_TILE_SIZE: u32 = 20;
pub const DEFAULT_MOSAIC_SIZE: u32 = 2000;
pub const DEFAULT_MATCH_POOL_SIZE: usize = 5;
pub const DEFAULT_INTERVAL_HOURS: u32 = 24;
pub const DEFAULT_RENDER_CONCURRENCY: usize = 6;

/// Largest accepted output side, in pixels.
pub const MAX_OUTPUT_SIDE: u32 = 10_000;

/// Persisted run parameters for the scheduled pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicConfig {
    pub enabled: bool,
    pub main_image_url: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub mosaic_key: String,
    pub mosaic_size: u32,
    pub allow_reuse: bool,
    pub reuse_after_exhaustion: bool,
    pub match_pool_size: usize,
    pub mismatch_distance_threshold: Option<f64>,
    pub min_use_once: bool,
    pub max_uses_per_photo: Option<u32>,
    pub sharpness: f32,
    pub overlay_opacity: f32,
    pub concurrency: usize,
    pub interval_hours: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            main_image_url: String::new(),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            mosaic_key: DEFAULT_MOSAIC_KEY.to_string(),
            mosaic_size: DEFAULT_MOSAIC_SIZE,
            allow_reuse: true,
            reuse_after_exhaustion: false,
            match_pool_size: DEFAULT_MATCH_POOL_SIZE,
            mismatch_distance_threshold: None,
            min_use_once: false,
            max_uses_per_photo: None,
            sharpness: 0.0,
            overlay_opacity: 0.0,
            concurrency: DEFAULT_RENDER_CONCURRENCY,
            interval_hours: DEFAULT_INTERVAL_HOURS,
            last_run_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Admin patch for the configuration.
///
/// Absent fields keep the stored value (or the default when nothing is stored).
/// The optional limits distinguish an absent field from an explicit `null`,
/// which clears them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub main_image_url: Option<String>,
    pub tile_width: Option<u32>,
    pub tile_height: Option<u32>,
    pub mosaic_key: Option<String>,
    pub mosaic_size: Option<u32>,
    pub allow_reuse: Option<bool>,
    pub reuse_after_exhaustion: Option<bool>,
    pub match_pool_size: Option<usize>,
    /// `null` or a negative value clears the threshold
    #[serde(default, deserialize_with = "nullable")]
    pub mismatch_distance_threshold: Option<Option<f64>>,
    pub min_use_once: Option<bool>,
    /// `null` or `0` removes the cap
    #[serde(default, deserialize_with = "nullable")]
    pub max_uses_per_photo: Option<Option<u32>>,
    pub sharpness: Option<f32>,
    pub overlay_opacity: Option<f32>,
    pub concurrency: Option<usize>,
    pub interval_hours: Option<u32>,
}

impl ConfigUpdate {
    /// Merge this patch over `existing` (or the defaults) and normalize.
    ///
    /// Zero sizes fall back to defaults, `interval_hours` is at least 1, and
    /// enabling the schedule requires a main image URL.
    pub fn apply(self, existing: Option<MosaicConfig>) -> Result<MosaicConfig, MosaicError> {
        let mut config = existing.unwrap_or_default();

        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(url) = self.main_image_url {
            config.main_image_url = url.trim().to_string();
        }
        if let Some(width) = self.tile_width {
            config.tile_width = non_zero_or(width, DEFAULT_TILE_SIZE);
        }
        if let Some(height) = self.tile_height {
            config.tile_height = non_zero_or(height, DEFAULT_TILE_SIZE);
        }
        if let Some(key) = self.mosaic_key {
            let key = key.trim();
            config.mosaic_key = if key.is_empty() {
                DEFAULT_MOSAIC_KEY.to_string()
            } else {
                key.to_string()
            };
        }
        if let Some(size) = self.mosaic_size {
            if size > MAX_OUTPUT_SIDE {
                return Err(MosaicError::InvalidInput(format!(
                    "mosaicSize must be at most {}, got {}",
                    MAX_OUTPUT_SIDE, size
                )));
            }
            config.mosaic_size = non_zero_or(size, DEFAULT_MOSAIC_SIZE);
        }
        if let Some(allow) = self.allow_reuse {
            config.allow_reuse = allow;
        }
        if let Some(reuse) = self.reuse_after_exhaustion {
            config.reuse_after_exhaustion = reuse;
        }
        if let Some(pool) = self.match_pool_size {
            config.match_pool_size = pool.max(1);
        }
        if let Some(threshold) = self.mismatch_distance_threshold {
            config.mismatch_distance_threshold =
                threshold.filter(|t| t.is_finite() && *t >= 0.0);
        }
        if let Some(min_use) = self.min_use_once {
            config.min_use_once = min_use;
        }
        if let Some(cap) = self.max_uses_per_photo {
            config.max_uses_per_photo = cap.filter(|cap| *cap > 0);
        }
        if let Some(sharpness) = self.sharpness {
            config.sharpness = sharpness.max(0.0);
        }
        if let Some(opacity) = self.overlay_opacity {
            config.overlay_opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(hours) = self.interval_hours {
            config.interval_hours = hours.max(1);
        }

        if config.enabled && config.main_image_url.is_empty() {
            return Err(MosaicError::InvalidInput(
                "mainImageUrl is required to enable scheduled runs".to_string(),
            ));
        }
        if !config.main_image_url.is_empty() {
            validate_url(&config.main_image_url)?;
        }

        config.updated_at = Utc::now();
        Ok(config)
    }
}

/// Present-but-null becomes `Some(None)`; absence is left to `#[serde(default)]`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn non_zero_or(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Reject strings that are not absolute URLs.
pub fn validate_url(value: &str) -> Result<(), MosaicError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| MosaicError::InvalidInput(format!("invalid URL '{}': {}", value, e)))
}

// =============================================================================
// Snapshot
// =============================================================================

/// Fully resolved parameters a snapshot was rendered with.
///
/// Output size, sharpness, opacity and concurrency are the values the render
/// actually used. Tile size and the matching policy are copied from the
/// persisted configuration at render time: tiles matched earlier through
/// `POST /tiles/match` with overrides may have used a different policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub tile_width: Option<u32>,
    pub tile_height: Option<u32>,
    pub output_width: u32,
    pub output_height: u32,
    pub allow_reuse: bool,
    pub reuse_after_exhaustion: bool,
    pub match_pool_size: usize,
    pub mismatch_distance_threshold: Option<f64>,
    pub min_use_once: bool,
    pub max_uses_per_photo: Option<u32>,
    pub sharpness: f32,
    pub overlay_opacity: f32,
    pub concurrency: usize,
}

/// Immutable record of one published render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicSnapshot {
    pub id: i64,
    pub mosaic_key: String,
    pub url: String,
    pub public_id: String,
    pub width: u32,
    pub height: u32,
    pub tiles_count: usize,
    pub format: String,
    pub config: SnapshotConfig,
    pub created_at: DateTime<Utc>,
}
