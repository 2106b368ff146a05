//! HTTP request handlers for the mosaic admin API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /tiles/generate` - Build the tile grid for a key
//! - `POST /tiles/match` - Match tiles to photos
//! - `GET /tiles` - List tiles for a key
//! - `POST /render` - Render and publish a snapshot
//! - `GET /snapshots`, `GET /snapshots/latest`, `DELETE /snapshots/{id}`
//! - `GET /config`, `PUT /config`
//! - `POST /main-image` - Upload a reference image
//! - `GET /photos`, `POST /photos` - Photo pool

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::MosaicError;
use crate::io::UploadedObject;
use crate::model::{ConfigUpdate, MosaicConfig, MosaicSnapshot, Photo, Tile, DEFAULT_MOSAIC_KEY};
use crate::mosaic::{
    GridRequest, MatchSummary, MosaicService, NewPhoto, OutputFormat, PolicyOverrides,
};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: MosaicService,
}

impl AppState {
    pub fn new(service: MosaicService) -> Self {
        Self { service }
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

/// Tile size used by `POST /tiles/generate` when the body omits it.
pub const DEFAULT_GENERATE_TILE_SIZE: i64 = 10;

fn default_key() -> String {
    DEFAULT_MOSAIC_KEY.to_string()
}

fn default_generate_tile_size() -> i64 {
    DEFAULT_GENERATE_TILE_SIZE
}

fn default_true() -> bool {
    true
}

/// Body of `POST /tiles/generate`.
///
/// Sizes are signed so negative values surface as a 400 rather than a
/// deserialization rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTilesBody {
    #[serde(default)]
    pub main_image_url: Option<String>,

    #[serde(default = "default_generate_tile_size")]
    pub tile_width: i64,

    #[serde(default = "default_generate_tile_size")]
    pub tile_height: i64,

    #[serde(default = "default_key")]
    pub mosaic_key: String,

    #[serde(default = "default_true")]
    pub overwrite: bool,
}

/// Body of `POST /tiles/match`: a key plus policy overrides.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTilesBody {
    #[serde(default = "default_key")]
    pub mosaic_key: String,

    #[serde(flatten)]
    pub overrides: PolicyOverrides,
}

/// Body of `POST /render`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderBody {
    pub mosaic_key: Option<String>,
    pub output_width: Option<f64>,
    pub output_height: Option<f64>,
    pub folder: Option<String>,
    pub public_id_prefix: Option<String>,
    pub format: Option<String>,
    pub concurrency: Option<usize>,
    pub sharpness: Option<f32>,
    pub overlay_opacity: Option<f32>,
    pub overlay_image_url: Option<String>,
}

/// `?mosaicKey=` query used by list endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub mosaic_key: Option<String>,
}

impl KeyQuery {
    fn key_or_default(&self) -> String {
        self.mosaic_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(default_key)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_input")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of `POST /tiles/generate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTilesResponse {
    pub mosaic_key: String,
    pub rows: u32,
    pub cols: u32,
    pub count: usize,
}

/// Response of `GET /config`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConfigResponse {
    Saved(Box<MosaicConfig>),
    /// Nothing saved yet: `{"enabled": false}`
    Unset { enabled: bool },
}

impl From<Option<MosaicConfig>> for ConfigResponse {
    fn from(config: Option<MosaicConfig>) -> Self {
        match config {
            Some(config) => ConfigResponse::Saved(Box::new(config)),
            None => ConfigResponse::Unset { enabled: false },
        }
    }
}

/// Response of `DELETE /snapshots/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSnapshotResponse {
    pub deleted: bool,
    pub id: i64,
    pub public_id: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert MosaicError to HTTP response.
///
/// Server errors are logged at ERROR, 404s at DEBUG and other client errors
/// at WARN.
impl IntoResponse for MosaicError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            MosaicError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            MosaicError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            MosaicError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            MosaicError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            MosaicError::Image { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "image_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            match &self {
                MosaicError::Upstream {
                    stage, mosaic_key, ..
                } => error!(
                    error_type,
                    status = status.as_u16(),
                    stage = %stage,
                    mosaic_key = %mosaic_key,
                    "Server error: {}",
                    message
                ),
                _ => error!(
                    error_type,
                    status = status.as_u16(),
                    "Server error: {}",
                    message
                ),
            }
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

fn positive_dimension(value: i64, name: &str) -> Result<u32, MosaicError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| MosaicError::InvalidInput(format!("{} must be a positive integer", name)))
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /tiles/generate`
///
/// Falls back to the configured main image when the body has none.
pub async fn generate_tiles_handler(
    State(state): State<AppState>,
    Json(body): Json<GenerateTilesBody>,
) -> Result<Json<GenerateTilesResponse>, MosaicError> {
    let tile_width = positive_dimension(body.tile_width, "tileWidth")?;
    let tile_height = positive_dimension(body.tile_height, "tileHeight")?;

    let main_image_url = match body.main_image_url.filter(|u| !u.trim().is_empty()) {
        Some(url) => url,
        None => state
            .service
            .config()
            .await?
            .map(|c| c.main_image_url)
            .unwrap_or_default(),
    };

    let request = GridRequest {
        main_image_url,
        tile_width,
        tile_height,
        mosaic_key: body.mosaic_key,
        overwrite: body.overwrite,
    };
    let summary = state.service.generate_tiles(&request).await?;

    Ok(Json(GenerateTilesResponse {
        mosaic_key: request.mosaic_key,
        rows: summary.rows,
        cols: summary.cols,
        count: summary.count,
    }))
}

/// `POST /tiles/match`
pub async fn match_tiles_handler(
    State(state): State<AppState>,
    Json(body): Json<MatchTilesBody>,
) -> Result<Json<MatchSummary>, MosaicError> {
    let summary = state
        .service
        .match_tiles(&body.mosaic_key, &body.overrides)
        .await?;
    Ok(Json(summary))
}

/// `GET /tiles?mosaicKey=`
pub async fn list_tiles_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Vec<Tile>>, MosaicError> {
    let tiles = state.service.tiles(&query.key_or_default()).await?;
    Ok(Json(tiles))
}

/// `POST /render`
pub async fn render_handler(
    State(state): State<AppState>,
    Json(body): Json<RenderBody>,
) -> Result<(StatusCode, Json<MosaicSnapshot>), MosaicError> {
    let key = body
        .mosaic_key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(default_key);
    let mut request = state.service.render_request(key);

    request.output_width = body.output_width;
    request.output_height = body.output_height;
    if let Some(folder) = body.folder {
        request.folder = folder;
    }
    if let Some(prefix) = body.public_id_prefix.filter(|p| !p.is_empty()) {
        request.public_id_prefix = prefix;
    }
    if let Some(format) = body.format {
        request.format = OutputFormat::parse(&format).ok_or_else(|| {
            MosaicError::InvalidInput(format!("unsupported format '{}', use jpg or png", format))
        })?;
    }
    request.concurrency = body.concurrency;
    request.sharpness = body.sharpness;
    request.overlay_opacity = body.overlay_opacity;
    request.overlay_image_url = body.overlay_image_url;

    let snapshot = state.service.render(&request).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// `GET /snapshots?mosaicKey=`
///
/// Without a key every snapshot is listed.
pub async fn list_snapshots_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Vec<MosaicSnapshot>>, MosaicError> {
    let key = query.mosaic_key.filter(|k| !k.trim().is_empty());
    let snapshots = state.service.snapshots(key.as_deref()).await?;
    Ok(Json(snapshots))
}

/// `GET /snapshots/latest?mosaicKey=`
pub async fn latest_snapshot_handler(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<MosaicSnapshot>, MosaicError> {
    let snapshot = state
        .service
        .latest_snapshot(&query.key_or_default())
        .await?;
    Ok(Json(snapshot))
}

/// `DELETE /snapshots/{id}`
pub async fn delete_snapshot_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteSnapshotResponse>, MosaicError> {
    let snapshot = state.service.delete_snapshot(id).await?;
    Ok(Json(DeleteSnapshotResponse {
        deleted: true,
        id: snapshot.id,
        public_id: snapshot.public_id,
    }))
}

/// `GET /config`
///
/// Answers `{"enabled": false}` when nothing has been saved yet.
pub async fn get_config_handler(
    State(state): State<AppState>,
) -> Result<Json<ConfigResponse>, MosaicError> {
    let config = state.service.config().await?;
    Ok(Json(config.into()))
}

/// `PUT /config`
pub async fn put_config_handler(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<MosaicConfig>, MosaicError> {
    let config = state.service.update_config(update).await?;
    Ok(Json(config))
}

/// `POST /main-image` with the raw image as body.
pub async fn upload_main_image_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadedObject>), MosaicError> {
    let uploaded = state.service.upload_main_image(body).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// `POST /photos`
pub async fn add_photo_handler(
    State(state): State<AppState>,
    Json(photo): Json<NewPhoto>,
) -> Result<(StatusCode, Json<Photo>), MosaicError> {
    let photo = state.service.add_photo(photo).await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

/// `GET /photos`
pub async fn list_photos_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Photo>>, MosaicError> {
    Ok(Json(state.service.photos().await?))
}
