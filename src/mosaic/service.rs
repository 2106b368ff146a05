//! Mosaic service.
//!
//! Facade over the pipeline stages. It owns the storage, fetch and object
//! store handles, merges request parameters with the persisted configuration,
//! and runs the full grid → match → render sequence for the scheduler.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use image::ImageFormat;
use serde::Deserialize;
use tracing::{info, warn};

use super::codec::{self, OutputFormat};
use super::color::dominant_color_of;
use super::grid::{build_grid, GridRequest, GridSummary};
use super::matcher::{match_tiles, MatchPolicy, MatchSummary, PolicyOverrides};
use super::render::{RenderRequest, Renderer, DEFAULT_PUBLIC_ID_PREFIX, DEFAULT_RENDER_FOLDER};
use crate::error::{IoError, MosaicError, Stage};
use crate::io::{ImageFetcher, ObjectStore, UploadOptions, UploadedObject, DEFAULT_FETCH_TIMEOUT};
use crate::model::{
    validate_url, ConfigUpdate, MosaicConfig, MosaicSnapshot, Photo, Tile,
    DEFAULT_RENDER_CONCURRENCY,
};
use crate::store::MosaicStore;

/// Folder uploaded main images are stored under.
pub const MAIN_IMAGE_FOLDER: &str = "Mosaic/main";

/// Process-level defaults for rendering.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub default_folder: String,
    pub default_format: OutputFormat,
    pub default_concurrency: usize,
    pub fetch_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_folder: DEFAULT_RENDER_FOLDER.to_string(),
            default_format: OutputFormat::default(),
            default_concurrency: DEFAULT_RENDER_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// A photo submitted to the pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPhoto {
    pub image_url: String,
    #[serde(default)]
    pub hidden: bool,
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

/// Entry point for every mosaic operation.
#[derive(Clone)]
pub struct MosaicService {
    store: Arc<dyn MosaicStore>,
    fetcher: Arc<dyn ImageFetcher>,
    objects: Arc<dyn ObjectStore>,
    renderer: Renderer,
    settings: ServiceSettings,
}

impl MosaicService {
    pub fn new(
        store: Arc<dyn MosaicStore>,
        fetcher: Arc<dyn ImageFetcher>,
        objects: Arc<dyn ObjectStore>,
        settings: ServiceSettings,
    ) -> Self {
        let renderer = Renderer::new(Arc::clone(&fetcher), settings.fetch_timeout)
            .with_default_concurrency(settings.default_concurrency);
        Self {
            store,
            fetcher,
            objects,
            renderer,
            settings,
        }
    }

    pub fn store(&self) -> &dyn MosaicStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Render request pre-filled with the process defaults.
    pub fn render_request(&self, mosaic_key: impl Into<String>) -> RenderRequest {
        let mut request = RenderRequest::new(mosaic_key);
        request.folder = self.settings.default_folder.clone();
        request.format = self.settings.default_format;
        request
    }

    // -------------------------------------------------------------------------
    // Pipeline stages
    // -------------------------------------------------------------------------

    pub async fn generate_tiles(&self, request: &GridRequest) -> Result<GridSummary, MosaicError> {
        build_grid(self.store.as_ref(), self.fetcher.as_ref(), request).await
    }

    /// Match a key's tiles, merging `overrides` over the persisted policy.
    pub async fn match_tiles(
        &self,
        mosaic_key: &str,
        overrides: &PolicyOverrides,
    ) -> Result<MatchSummary, MosaicError> {
        let base = self
            .store
            .config()
            .await?
            .map(|config| MatchPolicy::from_config(&config))
            .unwrap_or_default();
        match_tiles(self.store.as_ref(), mosaic_key, overrides.apply(base)).await
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<MosaicSnapshot, MosaicError> {
        let config = self.store.config().await?;
        self.renderer
            .render(
                self.store.as_ref(),
                self.objects.as_ref(),
                request,
                config.as_ref(),
            )
            .await
    }

    /// Grid (overwrite) → match → render for one configuration, then stamp
    /// `last_run_at`.
    pub async fn run_pipeline(&self, config: &MosaicConfig) -> Result<MosaicSnapshot, MosaicError> {
        let key = config.mosaic_key.as_str();
        info!(mosaic_key = key, "Starting mosaic pipeline");

        let grid = self
            .generate_tiles(&GridRequest {
                main_image_url: config.main_image_url.clone(),
                tile_width: config.tile_width,
                tile_height: config.tile_height,
                mosaic_key: key.to_string(),
                overwrite: true,
            })
            .await?;

        let matched = match_tiles(
            self.store.as_ref(),
            key,
            MatchPolicy::from_config(config).normalized(),
        )
        .await?;

        let mut request = self.render_request(key);
        request.output_width = Some(config.mosaic_size as f64);
        request.output_height = Some(config.mosaic_size as f64);
        request.public_id_prefix = DEFAULT_PUBLIC_ID_PREFIX.to_string();

        let snapshot = self
            .renderer
            .render(
                self.store.as_ref(),
                self.objects.as_ref(),
                &request,
                Some(config),
            )
            .await?;

        self.store.mark_run(Utc::now()).await?;

        info!(
            mosaic_key = key,
            tiles = grid.count,
            matched = matched.matched,
            snapshot = snapshot.id,
            "Mosaic pipeline finished"
        );
        Ok(snapshot)
    }

    /// Run the pipeline once for the persisted configuration, ignoring the schedule.
    pub async fn run_once(&self) -> Result<MosaicSnapshot, MosaicError> {
        let config = self
            .store
            .config()
            .await?
            .ok_or_else(|| MosaicError::NotFound("no mosaic configuration saved".to_string()))?;
        if config.main_image_url.is_empty() {
            return Err(MosaicError::InvalidInput(
                "configuration has no mainImageUrl".to_string(),
            ));
        }
        self.run_pipeline(&config).await
    }

    // -------------------------------------------------------------------------
    // Tiles and snapshots
    // -------------------------------------------------------------------------

    pub async fn tiles(&self, mosaic_key: &str) -> Result<Vec<Tile>, MosaicError> {
        Ok(self.store.tiles(mosaic_key).await?)
    }

    pub async fn snapshots(&self, mosaic_key: Option<&str>) -> Result<Vec<MosaicSnapshot>, MosaicError> {
        Ok(self.store.snapshots(mosaic_key).await?)
    }

    pub async fn latest_snapshot(&self, mosaic_key: &str) -> Result<MosaicSnapshot, MosaicError> {
        self.store
            .latest_snapshot(mosaic_key)
            .await?
            .ok_or_else(|| {
                MosaicError::NotFound(format!("no snapshot for mosaic '{}'", mosaic_key))
            })
    }

    /// Release a snapshot's storage object, then delete its record.
    ///
    /// A destroy answer other than "ok" or "not found" leaves the record in
    /// place and fails the call.
    pub async fn delete_snapshot(&self, id: i64) -> Result<MosaicSnapshot, MosaicError> {
        let snapshot = self
            .store
            .snapshot(id)
            .await?
            .ok_or_else(|| MosaicError::NotFound(format!("snapshot {} not found", id)))?;
        let key = snapshot.mosaic_key.as_str();

        let result = self
            .objects
            .destroy(&snapshot.public_id)
            .await
            .map_err(|e| MosaicError::upstream(Stage::Delete, key, e))?;
        if !result.is_released() {
            return Err(MosaicError::upstream(
                Stage::Delete,
                key,
                IoError::S3(format!(
                    "destroy of '{}' returned '{}'",
                    snapshot.public_id,
                    result.as_str()
                )),
            ));
        }

        self.store.delete_snapshot(id).await?;
        info!(mosaic_key = key, snapshot = id, result = result.as_str(), "Deleted snapshot");
        Ok(snapshot)
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub async fn config(&self) -> Result<Option<MosaicConfig>, MosaicError> {
        Ok(self.store.config().await?)
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> Result<MosaicConfig, MosaicError> {
        let existing = self.store.config().await?;
        let config = update.apply(existing)?;
        let saved = self.store.save_config(config).await?;
        info!(
            mosaic_key = %saved.mosaic_key,
            enabled = saved.enabled,
            interval_hours = saved.interval_hours,
            "Saved mosaic configuration"
        );
        Ok(saved)
    }

    // -------------------------------------------------------------------------
    // Uploads and photo pool
    // -------------------------------------------------------------------------

    /// Store a new main (reference) image and return where it landed.
    pub async fn upload_main_image(&self, data: Bytes) -> Result<UploadedObject, MosaicError> {
        if data.is_empty() {
            return Err(MosaicError::InvalidInput("image body is empty".to_string()));
        }
        codec::dimensions(&data)
            .map_err(|e| MosaicError::InvalidInput(format!("unreadable image: {}", e)))?;

        let format = match image::guess_format(&data) {
            Ok(ImageFormat::Png) => OutputFormat::Png,
            _ => OutputFormat::Jpg,
        };
        let public_id = format!("main-image-{}", timestamp());

        let uploaded = self
            .objects
            .upload(
                data,
                UploadOptions {
                    folder: MAIN_IMAGE_FOLDER.to_string(),
                    public_id,
                    format: format.extension().to_string(),
                },
            )
            .await
            .map_err(|e| MosaicError::upstream(Stage::Publish, "main-image", e))?;

        info!(url = %uploaded.url, width = uploaded.width, height = uploaded.height, "Uploaded main image");
        Ok(uploaded)
    }

    /// Fetch a photo, compute its dominant color and add it to the pool.
    pub async fn add_photo(&self, photo: NewPhoto) -> Result<Photo, MosaicError> {
        let url = photo.image_url.trim().to_string();
        if url.is_empty() {
            return Err(MosaicError::InvalidInput("imageUrl is required".to_string()));
        }
        validate_url(&url)?;

        let bytes = self
            .fetcher
            .get(&url)
            .await
            .map_err(|e| MosaicError::upstream(Stage::Ingest, "photos", e))?;

        let color = tokio::task::spawn_blocking(move || {
            codec::decode(&bytes).map(|image| dominant_color_of(&image))
        })
        .await
        .map_err(MosaicError::image)?
        .map_err(|e| {
            warn!(url = %url, error = %e, "Rejected undecodable photo");
            MosaicError::InvalidInput(format!("photo at {} is not a readable image", url))
        })?;

        let stored = self
            .store
            .insert_photo(Photo {
                id: 0,
                image_url: url,
                dominant_color: Some(color),
                hidden: photo.hidden,
            })
            .await?;

        info!(photo = stored.id, color = ?color, "Added photo to pool");
        Ok(stored)
    }

    pub async fn photos(&self) -> Result<Vec<Photo>, MosaicError> {
        Ok(self.store.photos().await?)
    }
}
