//! Render/compose engine.
//!
//! # Pipeline
//!
//! ```text
//!  tiles ──► CanvasPlan ──► worker pool (fetch + cover-fit per tile)
//!                                   │  failures become flat-color tiles
//!                                   ▼
//!                      composite on black canvas ──► overlay ──► encode
//!                                                                  │
//!                                        upload ◄──────────────────┘
//!                                          │
//!                                          ▼
//!                                      snapshot
//! ```
//!
//! Placement of every tile is scaled independently from its unscaled grid
//! coordinates, so rounding error stays within one pixel per edge and never
//! accumulates across a row. Worker completion order is irrelevant: each
//! result carries its own placement.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb as Pixel, RgbImage};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::codec::{self, OutputFormat};
use super::matcher::MatchPolicy;
use crate::error::{MosaicError, Stage};
use crate::io::{ImageFetcher, ObjectStore, UploadOptions};
use crate::model::{
    MosaicConfig, MosaicSnapshot, Rgb, SnapshotConfig, Tile, DEFAULT_RENDER_CONCURRENCY,
    MAX_OUTPUT_SIDE,
};
use crate::store::MosaicStore;

/// Lower bound of the tile worker pool.
pub const MIN_CONCURRENCY: usize = 1;

/// Upper bound of the tile worker pool.
pub const MAX_CONCURRENCY: usize = 16;

pub const DEFAULT_RENDER_FOLDER: &str = "Mosaic/renders";
pub const DEFAULT_PUBLIC_ID_PREFIX: &str = "mosaic";

// =============================================================================
// Request
// =============================================================================

/// Parameters for one render.
///
/// Optional knobs fall back to the persisted configuration, then to zero.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub mosaic_key: String,

    /// Target width; derived from the tile bounding box when absent
    pub output_width: Option<f64>,

    /// Target height; derived from the tile bounding box when absent
    pub output_height: Option<f64>,

    pub folder: String,
    pub public_id_prefix: String,
    pub format: OutputFormat,

    /// Worker pool size, clamped to `[1, 16]`
    pub concurrency: Option<usize>,

    pub sharpness: Option<f32>,
    pub overlay_opacity: Option<f32>,

    /// Reference image blended over the composite; defaults to the main image
    pub overlay_image_url: Option<String>,
}

impl RenderRequest {
    pub fn new(mosaic_key: impl Into<String>) -> Self {
        Self {
            mosaic_key: mosaic_key.into(),
            output_width: None,
            output_height: None,
            folder: DEFAULT_RENDER_FOLDER.to_string(),
            public_id_prefix: DEFAULT_PUBLIC_ID_PREFIX.to_string(),
            format: OutputFormat::default(),
            concurrency: None,
            sharpness: None,
            overlay_opacity: None,
            overlay_image_url: None,
        }
    }
}

/// Clamp a requested pool size into `[MIN_CONCURRENCY, MAX_CONCURRENCY]`.
pub fn clamp_concurrency(concurrency: usize) -> usize {
    concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

// =============================================================================
// Canvas plan
// =============================================================================

/// Scaled position and footprint of one tile on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Mapping from grid coordinates to output canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasPlan {
    pub base_width: u32,
    pub base_height: u32,
    pub width: u32,
    pub height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
}

fn target_dimension(requested: Option<f64>, base: u32, axis: &str) -> Result<u32, MosaicError> {
    match requested {
        None => Ok(base),
        Some(value) if !value.is_finite() || value <= 0.0 => Err(MosaicError::InvalidInput(
            format!("output {} must be a positive number, got {}", axis, value),
        )),
        Some(value) if value.round() > MAX_OUTPUT_SIDE as f64 => Err(MosaicError::InvalidInput(
            format!("output {} must be at most {}, got {}", axis, MAX_OUTPUT_SIDE, value),
        )),
        Some(value) => Ok((value.round() as u32).max(1)),
    }
}

impl CanvasPlan {
    /// Plan a canvas for `tiles`, scaled to the requested size.
    pub fn new(
        tiles: &[Tile],
        output_width: Option<f64>,
        output_height: Option<f64>,
    ) -> Result<Self, MosaicError> {
        let base_width = tiles.iter().map(Tile::right).max().unwrap_or(0);
        let base_height = tiles.iter().map(Tile::bottom).max().unwrap_or(0);
        if base_width == 0 || base_height == 0 {
            return Err(MosaicError::InvalidInput(
                "tiles do not cover any pixels".to_string(),
            ));
        }

        let width = target_dimension(output_width, base_width, "width")?;
        let height = target_dimension(output_height, base_height, "height")?;

        Ok(Self {
            base_width,
            base_height,
            width,
            height,
            scale_x: width as f64 / base_width as f64,
            scale_y: height as f64 / base_height as f64,
        })
    }

    /// Canvas rectangle for `tile`. Edges are rounded independently, so
    /// neighbours share edges exactly.
    pub fn place(&self, tile: &Tile) -> Placement {
        let scale = |v: u32, s: f64| (v as f64 * s).round() as u32;
        let x = scale(tile.left, self.scale_x);
        let y = scale(tile.top, self.scale_y);
        Placement {
            x,
            y,
            width: scale(tile.right(), self.scale_x).saturating_sub(x).max(1),
            height: scale(tile.bottom(), self.scale_y).saturating_sub(y).max(1),
        }
    }
}

// =============================================================================
// Tile images
// =============================================================================

/// Flat tile painted with a dominant color.
pub fn flat_tile(color: Rgb, width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Pixel(color))
}

/// Decode a photo and cover-fit it to `width × height`, sharpening if asked.
pub fn fit_tile(
    source: &[u8],
    width: u32,
    height: u32,
    sharpness: f32,
) -> Result<RgbImage, image::ImageError> {
    let photo = codec::decode(source)?;
    let fitted = photo.resize_to_fill(width, height, FilterType::Lanczos3);
    let fitted = if sharpness > 0.0 {
        fitted.unsharpen(sharpness, 0)
    } else {
        fitted
    };
    Ok(fitted.to_rgb8())
}

/// Run `blend` on the blocking pool, falling back to the untouched canvas
/// when it fails or its worker panics.
async fn blend_or_keep<F>(canvas: RgbImage, blend: F, mosaic_key: &str) -> RgbImage
where
    F: FnOnce(&RgbImage) -> Result<RgbImage, image::ImageError> + Send + 'static,
{
    let canvas = Arc::new(canvas);
    let shared = Arc::clone(&canvas);

    match tokio::task::spawn_blocking(move || blend(&shared)).await {
        Ok(Ok(blended)) => return blended,
        Ok(Err(e)) => warn!(mosaic_key, error = %e, "Overlay decode failed, skipping overlay"),
        Err(e) => warn!(mosaic_key, error = %e, "Overlay worker aborted, skipping overlay"),
    }

    Arc::try_unwrap(canvas).unwrap_or_else(|shared| (*shared).clone())
}

#[derive(Debug, Clone)]
struct TileJob {
    tile_id: i64,
    url: Option<String>,
    color: Rgb,
    placement: Placement,
}

async fn render_tile(
    fetcher: &dyn ImageFetcher,
    job: &TileJob,
    sharpness: f32,
    fetch_timeout: Duration,
) -> RgbImage {
    let Placement { width, height, .. } = job.placement;
    let Some(url) = job.url.as_deref() else {
        return flat_tile(job.color, width, height);
    };

    let bytes = match tokio::time::timeout(fetch_timeout, fetcher.get(url)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!(tile = job.tile_id, url, error = %e, "Tile fetch failed, using flat color");
            return flat_tile(job.color, width, height);
        }
        Err(_) => {
            debug!(tile = job.tile_id, url, "Tile fetch timed out, using flat color");
            return flat_tile(job.color, width, height);
        }
    };

    match tokio::task::spawn_blocking(move || fit_tile(&bytes, width, height, sharpness)).await {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            debug!(tile = job.tile_id, url, error = %e, "Tile decode failed, using flat color");
            flat_tile(job.color, width, height)
        }
        Err(e) => {
            warn!(tile = job.tile_id, error = %e, "Tile worker aborted, using flat color");
            flat_tile(job.color, width, height)
        }
    }
}

/// Blend a reference image over the canvas at a uniform opacity.
pub fn apply_overlay(
    canvas: &RgbImage,
    reference: &[u8],
    opacity: f32,
) -> Result<RgbImage, image::ImageError> {
    let reference = codec::decode(reference)?.resize_exact(
        canvas.width(),
        canvas.height(),
        FilterType::Triangle,
    );

    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut layer = reference.to_rgba8();
    for pixel in layer.pixels_mut() {
        pixel.0[3] = alpha;
    }

    let mut base = DynamicImage::ImageRgb8(canvas.clone()).to_rgba8();
    imageops::overlay(&mut base, &layer, 0, 0);
    Ok(DynamicImage::ImageRgba8(base).to_rgb8())
}

// =============================================================================
// Renderer
// =============================================================================

/// Composes mosaics from matched tiles.
#[derive(Clone)]
pub struct Renderer {
    fetcher: Arc<dyn ImageFetcher>,
    fetch_timeout: Duration,
    default_concurrency: usize,
}

/// Knobs resolved from the request, the persisted config and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOptions {
    pub concurrency: usize,
    pub sharpness: f32,
    pub overlay_opacity: f32,
    pub overlay_image_url: Option<String>,
}

impl ComposeOptions {
    fn resolve(request: &RenderRequest, config: Option<&MosaicConfig>, default_concurrency: usize) -> Self {
        let concurrency = request
            .concurrency
            .or(config.map(|c| c.concurrency))
            .unwrap_or(default_concurrency);
        let sharpness = request
            .sharpness
            .or(config.map(|c| c.sharpness))
            .unwrap_or(0.0);
        let overlay_opacity = request
            .overlay_opacity
            .or(config.map(|c| c.overlay_opacity))
            .unwrap_or(0.0);
        let overlay_image_url = request
            .overlay_image_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| {
                config
                    .map(|c| c.main_image_url.clone())
                    .filter(|url| !url.is_empty())
            });

        Self {
            concurrency: clamp_concurrency(concurrency),
            sharpness: if sharpness.is_finite() { sharpness.max(0.0) } else { 0.0 },
            overlay_opacity: if overlay_opacity.is_finite() {
                overlay_opacity.clamp(0.0, 1.0)
            } else {
                0.0
            },
            overlay_image_url,
        }
    }
}

impl Renderer {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            fetch_timeout,
            default_concurrency: DEFAULT_RENDER_CONCURRENCY,
        }
    }

    /// Pool size used when neither the request nor the config sets one.
    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = clamp_concurrency(concurrency);
        self
    }

    /// Fetch and fit every tile, then composite them onto a black canvas.
    ///
    /// Per-tile failures are replaced with flat tiles; only a failure of the
    /// composite itself is returned as an error.
    pub async fn compose(
        &self,
        tiles: &[Tile],
        plan: &CanvasPlan,
        options: &ComposeOptions,
    ) -> Result<RgbImage, MosaicError> {
        let semaphore = Arc::new(Semaphore::new(clamp_concurrency(options.concurrency)));
        let mut workers = JoinSet::new();

        for tile in tiles {
            let job = TileJob {
                tile_id: tile.id,
                url: Some(tile.matched_url.clone()).filter(|url| !url.is_empty()),
                color: tile.color,
                placement: plan.place(tile),
            };
            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let sharpness = options.sharpness;
            let fetch_timeout = self.fetch_timeout;

            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let image = render_tile(fetcher.as_ref(), &job, sharpness, fetch_timeout).await;
                (job.placement, image)
            });
        }

        let mut rendered = Vec::with_capacity(tiles.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => rendered.push(result),
                Err(e) => warn!(error = %e, "Tile worker panicked, tile left blank"),
            }
        }

        let (width, height) = (plan.width, plan.height);
        tokio::task::spawn_blocking(move || {
            let mut canvas = RgbImage::new(width, height);
            for (placement, image) in &rendered {
                imageops::replace(&mut canvas, image, placement.x as i64, placement.y as i64);
            }
            canvas
        })
        .await
        .map_err(MosaicError::image)
    }

    /// Blend the reference image over the canvas; failures are logged only.
    async fn overlay(&self, canvas: RgbImage, options: &ComposeOptions, mosaic_key: &str) -> RgbImage {
        if options.overlay_opacity <= 0.0 {
            return canvas;
        }
        let Some(url) = options.overlay_image_url.as_deref() else {
            debug!(mosaic_key, "Overlay requested without a reference image");
            return canvas;
        };

        let bytes = match tokio::time::timeout(self.fetch_timeout, self.fetcher.get(url)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(mosaic_key, url, error = %e, "Overlay fetch failed, skipping overlay");
                return canvas;
            }
            Err(_) => {
                warn!(mosaic_key, url, "Overlay fetch timed out, skipping overlay");
                return canvas;
            }
        };

        let opacity = options.overlay_opacity;
        blend_or_keep(
            canvas,
            move |canvas| apply_overlay(canvas, &bytes, opacity),
            mosaic_key,
        )
        .await
    }

    /// Render the matched tiles of a key, publish the result and record a snapshot.
    pub async fn render(
        &self,
        store: &dyn MosaicStore,
        objects: &dyn ObjectStore,
        request: &RenderRequest,
        config: Option<&MosaicConfig>,
    ) -> Result<MosaicSnapshot, MosaicError> {
        let key = request.mosaic_key.as_str();

        let tiles = store.tiles(key).await?;
        if tiles.is_empty() {
            return Err(MosaicError::NotFound(format!(
                "no tiles for mosaic '{}'",
                key
            )));
        }

        let plan = CanvasPlan::new(&tiles, request.output_width, request.output_height)?;
        let options = ComposeOptions::resolve(request, config, self.default_concurrency);

        debug!(
            mosaic_key = key,
            tiles = tiles.len(),
            width = plan.width,
            height = plan.height,
            concurrency = options.concurrency,
            "Composing mosaic"
        );

        let canvas = self.compose(&tiles, &plan, &options).await?;
        let canvas = self.overlay(canvas, &options, key).await;

        let format = request.format;
        let encoded = tokio::task::spawn_blocking(move || codec::encode(&canvas, format))
            .await
            .map_err(MosaicError::image)??;

        let public_id = format!(
            "{}-{}-{}",
            request.public_id_prefix,
            key,
            Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ")
        );
        let uploaded = objects
            .upload(
                encoded,
                UploadOptions {
                    folder: request.folder.clone(),
                    public_id,
                    format: format.extension().to_string(),
                },
            )
            .await
            .map_err(|e| MosaicError::upstream(Stage::Publish, key, e))?;

        // Persisted policy, not necessarily the one the tiles were matched with
        let policy = config.map(MatchPolicy::from_config).unwrap_or_default();
        let snapshot = MosaicSnapshot {
            id: 0,
            mosaic_key: key.to_string(),
            url: uploaded.url,
            public_id: uploaded.public_id,
            width: if uploaded.width > 0 { uploaded.width } else { plan.width },
            height: if uploaded.height > 0 { uploaded.height } else { plan.height },
            tiles_count: tiles.len(),
            format: format.extension().to_string(),
            config: SnapshotConfig {
                tile_width: config.map(|c| c.tile_width),
                tile_height: config.map(|c| c.tile_height),
                output_width: plan.width,
                output_height: plan.height,
                allow_reuse: policy.allow_reuse,
                reuse_after_exhaustion: policy.reuse_after_exhaustion,
                match_pool_size: policy.match_pool_size,
                mismatch_distance_threshold: policy.mismatch_distance_threshold,
                min_use_once: policy.min_use_once,
                max_uses_per_photo: policy.max_uses_per_photo,
                sharpness: options.sharpness,
                overlay_opacity: options.overlay_opacity,
                concurrency: options.concurrency,
            },
            created_at: Utc::now(),
        };

        let snapshot = store.insert_snapshot(snapshot).await?;

        info!(
            mosaic_key = key,
            snapshot = snapshot.id,
            url = %snapshot.url,
            width = snapshot.width,
            height = snapshot.height,
            tiles = snapshot.tiles_count,
            "Published mosaic"
        );

        Ok(snapshot)
    }
}
