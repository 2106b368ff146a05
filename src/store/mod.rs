//! Persistence layer.
//!
//! The pipeline talks to storage through the [`MosaicStore`] trait so the
//! same code runs against SQLite in production and an in-memory store in
//! tests or ephemeral deployments.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        MosaicService / Scheduler        │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           MosaicStore Trait             │
//! └────────────────────┬────────────────────┘
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │  MemoryStore    │    │    SqliteStore      │
//! └─────────────────┘    └─────────────────────┘
//! ```

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IoError;
use crate::model::{MosaicConfig, MosaicSnapshot, Photo, Tile, TileMatch};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage operations consumed by the mosaic pipeline and admin surface.
#[async_trait]
pub trait MosaicStore: Send + Sync {
    /// All tiles for a mosaic key, in row-major order.
    async fn tiles(&self, mosaic_key: &str) -> Result<Vec<Tile>, IoError>;

    /// Delete every tile for a mosaic key, returning how many were removed.
    async fn delete_tiles(&self, mosaic_key: &str) -> Result<usize, IoError>;

    /// Insert tiles in bulk. Fails if any `(mosaic_key, row, col)` already exists.
    async fn insert_tiles(&self, tiles: Vec<Tile>) -> Result<usize, IoError>;

    /// Apply match assignments in one bulk write, returning the number updated.
    async fn update_matches(&self, matches: &[TileMatch]) -> Result<usize, IoError>;

    /// Every photo in the pool, newest first.
    async fn photos(&self) -> Result<Vec<Photo>, IoError>;

    /// Visible photos with a dominant color.
    async fn eligible_photos(&self) -> Result<Vec<Photo>, IoError> {
        let photos = self.photos().await?;
        Ok(photos.into_iter().filter(Photo::is_eligible).collect())
    }

    /// Insert a photo; the returned record carries the assigned id.
    async fn insert_photo(&self, photo: Photo) -> Result<Photo, IoError>;

    /// The persisted configuration, if any.
    async fn config(&self) -> Result<Option<MosaicConfig>, IoError>;

    /// Upsert the configuration.
    async fn save_config(&self, config: MosaicConfig) -> Result<MosaicConfig, IoError>;

    /// Stamp `last_run_at` on the persisted configuration.
    async fn mark_run(&self, at: DateTime<Utc>) -> Result<(), IoError>;

    /// Insert a snapshot; the returned record carries the assigned id.
    async fn insert_snapshot(&self, snapshot: MosaicSnapshot) -> Result<MosaicSnapshot, IoError>;

    /// Snapshots newest first, optionally restricted to one key.
    async fn snapshots(&self, mosaic_key: Option<&str>) -> Result<Vec<MosaicSnapshot>, IoError>;

    /// Most recent snapshot for a key.
    async fn latest_snapshot(&self, mosaic_key: &str) -> Result<Option<MosaicSnapshot>, IoError> {
        let snapshots = self.snapshots(Some(mosaic_key)).await?;
        Ok(snapshots.into_iter().next())
    }

    async fn snapshot(&self, id: i64) -> Result<Option<MosaicSnapshot>, IoError>;

    /// Delete a snapshot record, returning whether it existed.
    async fn delete_snapshot(&self, id: i64) -> Result<bool, IoError>;
}
