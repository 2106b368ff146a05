use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::MosaicStore;
use crate::error::IoError;
use crate::model::{MosaicConfig, MosaicSnapshot, Photo, Tile, TileMatch};

#[derive(Default)]
struct Inner {
    tiles: Vec<Tile>,
    photos: Vec<Photo>,
    config: Option<MosaicConfig>,
    snapshots: Vec<MosaicSnapshot>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`MosaicStore`].
///
/// Nothing survives a restart. Used by tests and by `serve` when no database
/// path is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with photos (ids are reassigned).
    pub async fn with_photos(self, photos: Vec<Photo>) -> Self {
        for photo in photos {
            // Infallible for the memory store
            let _ = self.insert_photo(photo).await;
        }
        self
    }
}

#[async_trait]
impl MosaicStore for MemoryStore {
    async fn tiles(&self, mosaic_key: &str) -> Result<Vec<Tile>, IoError> {
        let inner = self.inner.read().await;
        let mut tiles: Vec<Tile> = inner
            .tiles
            .iter()
            .filter(|t| t.mosaic_key == mosaic_key)
            .cloned()
            .collect();
        tiles.sort_by_key(|t| (t.row, t.col));
        Ok(tiles)
    }

    async fn delete_tiles(&self, mosaic_key: &str) -> Result<usize, IoError> {
        let mut inner = self.inner.write().await;
        let before = inner.tiles.len();
        inner.tiles.retain(|t| t.mosaic_key != mosaic_key);
        Ok(before - inner.tiles.len())
    }

    async fn insert_tiles(&self, tiles: Vec<Tile>) -> Result<usize, IoError> {
        let mut inner = self.inner.write().await;

        let mut seen: std::collections::HashSet<(String, u32, u32)> = inner
            .tiles
            .iter()
            .map(|t| (t.mosaic_key.clone(), t.row, t.col))
            .collect();
        for tile in &tiles {
            if !seen.insert((tile.mosaic_key.clone(), tile.row, tile.col)) {
                return Err(IoError::Database(format!(
                    "duplicate tile ({}, {}, {})",
                    tile.mosaic_key, tile.row, tile.col
                )));
            }
        }

        let count = tiles.len();
        for mut tile in tiles {
            tile.id = inner.next_id();
            inner.tiles.push(tile);
        }
        Ok(count)
    }

    async fn update_matches(&self, matches: &[TileMatch]) -> Result<usize, IoError> {
        let mut inner = self.inner.write().await;
        let by_id: HashMap<i64, &TileMatch> = matches.iter().map(|m| (m.tile_id, m)).collect();

        let mut updated = 0;
        for tile in inner.tiles.iter_mut() {
            if let Some(m) = by_id.get(&tile.id) {
                tile.matched_photo = Some(m.photo_id);
                tile.matched_url = m.url.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn photos(&self) -> Result<Vec<Photo>, IoError> {
        let inner = self.inner.read().await;
        Ok(inner.photos.iter().rev().cloned().collect())
    }

    async fn insert_photo(&self, mut photo: Photo) -> Result<Photo, IoError> {
        let mut inner = self.inner.write().await;
        photo.id = inner.next_id();
        inner.photos.push(photo.clone());
        Ok(photo)
    }

    async fn config(&self) -> Result<Option<MosaicConfig>, IoError> {
        Ok(self.inner.read().await.config.clone())
    }

    async fn save_config(&self, config: MosaicConfig) -> Result<MosaicConfig, IoError> {
        self.inner.write().await.config = Some(config.clone());
        Ok(config)
    }

    async fn mark_run(&self, at: DateTime<Utc>) -> Result<(), IoError> {
        let mut inner = self.inner.write().await;
        match inner.config.as_mut() {
            Some(config) => {
                config.last_run_at = Some(at);
                Ok(())
            }
            None => Err(IoError::NotFound("mosaic config".to_string())),
        }
    }

    async fn insert_snapshot(&self, mut snapshot: MosaicSnapshot) -> Result<MosaicSnapshot, IoError> {
        let mut inner = self.inner.write().await;
        snapshot.id = inner.next_id();
        inner.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn snapshots(&self, mosaic_key: Option<&str>) -> Result<Vec<MosaicSnapshot>, IoError> {
        let inner = self.inner.read().await;
        let mut snapshots: Vec<MosaicSnapshot> = inner
            .snapshots
            .iter()
            .filter(|s| mosaic_key.map_or(true, |key| s.mosaic_key == key))
            .cloned()
            .collect();
        // Newest first; ids break ties between equal timestamps
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    async fn snapshot(&self, id: i64) -> Result<Option<MosaicSnapshot>, IoError> {
        let inner = self.inner.read().await;
        Ok(inner.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn delete_snapshot(&self, id: i64) -> Result<bool, IoError> {
        let mut inner = self.inner.write().await;
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| s.id != id);
        Ok(inner.snapshots.len() != before)
    }
}
