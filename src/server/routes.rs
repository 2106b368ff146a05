//! Router configuration for the mosaic admin API.
//!
//! # Route Structure
//!
//! ```text
//! /health                      GET
//! /tiles                       GET      ?mosaicKey=
//! /tiles/generate              POST
//! /tiles/match                 POST
//! /render                      POST
//! /snapshots                   GET      ?mosaicKey=
//! /snapshots/latest            GET      ?mosaicKey=
//! /snapshots/{id}              DELETE
//! /config                      GET, PUT
//! /main-image                  POST     raw image body
//! /photos                      GET, POST
//! ```
//!
//! # Example
//!
//! ```ignore
//! let router = create_router(service, RouterConfig::new().with_tracing(false));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{delete, get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_photo_handler, delete_snapshot_handler, generate_tiles_handler, get_config_handler,
    health_handler, latest_snapshot_handler, list_photos_handler, list_snapshots_handler,
    list_tiles_handler, match_tiles_handler, put_config_handler, render_handler,
    upload_main_image_handler, AppState,
};
use crate::mosaic::MosaicService;

/// Largest accepted main-image upload.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Any CORS origin, tracing enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router(service: MosaicService, config: RouterConfig) -> Router {
    let app_state = AppState::new(service);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tiles", get(list_tiles_handler))
        .route("/tiles/generate", post(generate_tiles_handler))
        .route("/tiles/match", post(match_tiles_handler))
        .route("/render", post(render_handler))
        .route("/snapshots", get(list_snapshots_handler))
        .route("/snapshots/latest", get(latest_snapshot_handler))
        .route("/snapshots/{id}", delete(delete_snapshot_handler))
        .route("/config", get(get_config_handler).put(put_config_handler))
        .route(
            "/main-image",
            post(upload_main_image_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/photos", get(list_photos_handler).post(add_photo_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}
