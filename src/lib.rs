//! # Photo Mosaic
//!
//! Builds photo mosaics of a reference image from a pool of photographs and
//! publishes them to S3-compatible object storage.
//!
//! ## Pipeline
//!
//! 1. **Grid**: the reference image is cut into a grid of tiles and each
//!    tile's dominant color is recorded.
//! 2. **Match**: every tile is assigned a photo by nearest dominant color,
//!    subject to reuse and fairness policies.
//! 3. **Render**: matched photos are fetched under bounded concurrency,
//!    cover-fit into their cells, composited, optionally blended with the
//!    reference image, encoded and published as an immutable snapshot.
//!
//! A scheduler re-runs the whole pipeline on an interval from the persisted
//! configuration, and an admin HTTP API exposes each stage.
//!
//! ## Architecture
//!
//! - [`mosaic`] - Color extraction, grid, matcher, renderer and service facade
//! - [`store`] - Persistence of tiles, photos, configuration and snapshots
//! - [`io`] - Remote image fetching and object storage
//! - [`scheduler`] - Interval-driven pipeline runs
//! - [`server`] - Axum-based admin API
//! - [`config`] - CLI and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use photo_mosaic::{
//!     create_router, create_s3_client, HttpFetcher, MemoryStore, MosaicService, RouterConfig,
//!     S3ObjectStore, ServiceSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = create_s3_client(None, "us-east-1").await;
//!     let objects = S3ObjectStore::new(
//!         client,
//!         "mosaics".to_string(),
//!         "https://mosaics.s3.us-east-1.amazonaws.com",
//!     );
//!     let service = MosaicService::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(HttpFetcher::new(Duration::from_secs(30))?),
//!         Arc::new(objects),
//!         ServiceSettings::default(),
//!     );
//!
//!     let router = create_router(service, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod mosaic;
pub mod scheduler;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::{Cli, Command, RunConfig, ServeConfig, StorageConfig};
pub use error::{IoError, MosaicError, Stage};
pub use io::{
    create_s3_client, DestroyResult, HttpFetcher, ImageFetcher, ObjectStore, S3ObjectStore,
    UploadOptions, UploadedObject,
};
pub use model::{
    ConfigUpdate, MosaicConfig, MosaicSnapshot, Photo, PhotoId, Rgb, SnapshotConfig, Tile,
    TileMatch,
};
pub use mosaic::{
    GridRequest, GridSummary, MatchPolicy, MatchSummary, MosaicService, NewPhoto, OutputFormat,
    PolicyOverrides, RenderRequest, ServiceSettings,
};
pub use scheduler::{Scheduler, TickOutcome};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use store::{MemoryStore, MosaicStore, SqliteStore};
