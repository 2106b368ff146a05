use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::MosaicStore;
use crate::error::IoError;
use crate::model::{MosaicConfig, MosaicSnapshot, Photo, Tile, TileMatch};

/// SQLite-backed [`MosaicStore`].
///
/// `rusqlite` is blocking, so every call runs on tokio's blocking pool behind
/// a single connection mutex.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let conn = Connection::open(path.as_ref()).map_err(db_error)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, IoError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, IoError> {
        init_schema(&conn).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, IoError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| IoError::Database("connection mutex poisoned".to_string()))?;
            f(&mut guard).map_err(db_error)
        })
        .await
        .map_err(|e| IoError::Database(format!("blocking task failed: {}", e)))?
    }
}

fn db_error(e: rusqlite::Error) -> IoError {
    IoError::Database(e.to_string())
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tiles (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            mosaic_key      TEXT NOT NULL,
            tile_row        INTEGER NOT NULL,
            tile_col        INTEGER NOT NULL,
            left_px         INTEGER NOT NULL,
            top_px          INTEGER NOT NULL,
            width           INTEGER NOT NULL,
            height          INTEGER NOT NULL,
            color_r         INTEGER NOT NULL,
            color_g         INTEGER NOT NULL,
            color_b         INTEGER NOT NULL,
            matched_photo   INTEGER,
            matched_url     TEXT NOT NULL DEFAULT '',
            UNIQUE (mosaic_key, tile_row, tile_col)
        );
        CREATE INDEX IF NOT EXISTS idx_tiles_mosaic_key ON tiles(mosaic_key);

        CREATE TABLE IF NOT EXISTS photos (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            image_url       TEXT NOT NULL,
            color_r         INTEGER,
            color_g         INTEGER,
            color_b         INTEGER,
            hidden          INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS mosaic_config (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            body            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            mosaic_key      TEXT NOT NULL,
            url             TEXT NOT NULL,
            public_id       TEXT NOT NULL,
            width           INTEGER NOT NULL,
            height          INTEGER NOT NULL,
            tiles_count     INTEGER NOT NULL,
            format          TEXT NOT NULL,
            config          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_key_created
            ON snapshots(mosaic_key, created_at DESC);",
    )
}

// =============================================================================
// Row mapping
// =============================================================================

const TILE_COLUMNS: &str = "id, mosaic_key, tile_row, tile_col, left_px, top_px, width, height, \
                            color_r, color_g, color_b, matched_photo, matched_url";

const SNAPSHOT_COLUMNS: &str =
    "id, mosaic_key, url, public_id, width, height, tiles_count, format, config, created_at";

fn tile_from_row(row: &Row<'_>) -> rusqlite::Result<Tile> {
    Ok(Tile {
        id: row.get(0)?,
        mosaic_key: row.get(1)?,
        row: row.get(2)?,
        col: row.get(3)?,
        left: row.get(4)?,
        top: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        color: [row.get(8)?, row.get(9)?, row.get(10)?],
        matched_photo: row.get(11)?,
        matched_url: row.get(12)?,
    })
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let r: Option<u8> = row.get(2)?;
    let g: Option<u8> = row.get(3)?;
    let b: Option<u8> = row.get(4)?;
    let dominant_color = match (r, g, b) {
        (Some(r), Some(g), Some(b)) => Some([r, g, b]),
        _ => None,
    };

    Ok(Photo {
        id: row.get(0)?,
        image_url: row.get(1)?,
        dominant_color,
        hidden: row.get(5)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<MosaicSnapshot> {
    let config_json: String = row.get(8)?;
    let config = serde_json::from_str(&config_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let tiles_count: i64 = row.get(6)?;

    Ok(MosaicSnapshot {
        id: row.get(0)?,
        mosaic_key: row.get(1)?,
        url: row.get(2)?,
        public_id: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        tiles_count: tiles_count.max(0) as usize,
        format: row.get(7)?,
        config,
        created_at,
    })
}

fn load_config(conn: &Connection) -> rusqlite::Result<Option<MosaicConfig>> {
    let body: Option<String> = conn
        .query_row("SELECT body FROM mosaic_config WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    body.map(|body| {
        serde_json::from_str(&body)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn store_config(conn: &Connection, config: &MosaicConfig) -> rusqlite::Result<()> {
    let body = serde_json::to_string(config)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO mosaic_config (id, body) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        params![body],
    )?;
    Ok(())
}

// =============================================================================
// MosaicStore
// =============================================================================

#[async_trait]
impl MosaicStore for SqliteStore {
    async fn tiles(&self, mosaic_key: &str) -> Result<Vec<Tile>, IoError> {
        let key = mosaic_key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tiles WHERE mosaic_key = ?1 ORDER BY tile_row, tile_col",
                TILE_COLUMNS
            ))?;
            let tiles = stmt
                .query_map(params![key], tile_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tiles)
        })
        .await
    }

    async fn delete_tiles(&self, mosaic_key: &str) -> Result<usize, IoError> {
        let key = mosaic_key.to_string();
        self.with_conn(move |conn| conn.execute("DELETE FROM tiles WHERE mosaic_key = ?1", params![key]))
            .await
    }

    async fn insert_tiles(&self, tiles: Vec<Tile>) -> Result<usize, IoError> {
        let count = tiles.len();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO tiles (mosaic_key, tile_row, tile_col, left_px, top_px, width,
                                        height, color_r, color_g, color_b, matched_photo, matched_url)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )?;
                for tile in &tiles {
                    stmt.execute(params![
                        tile.mosaic_key,
                        tile.row,
                        tile.col,
                        tile.left,
                        tile.top,
                        tile.width,
                        tile.height,
                        tile.color[0],
                        tile.color[1],
                        tile.color[2],
                        tile.matched_photo,
                        tile.matched_url,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn update_matches(&self, matches: &[TileMatch]) -> Result<usize, IoError> {
        let matches = matches.to_vec();
        let updated = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut updated = 0;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE tiles SET matched_photo = ?1, matched_url = ?2 WHERE id = ?3",
                    )?;
                    for m in &matches {
                        updated += stmt.execute(params![m.photo_id, m.url, m.tile_id])?;
                    }
                }
                tx.commit()?;
                Ok(updated)
            })
            .await?;
        debug!(updated, "Applied tile matches");
        Ok(updated)
    }

    async fn photos(&self) -> Result<Vec<Photo>, IoError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, image_url, color_r, color_g, color_b, hidden
                 FROM photos ORDER BY id DESC",
            )?;
            let photos = stmt
                .query_map([], photo_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(photos)
        })
        .await
    }

    async fn insert_photo(&self, mut photo: Photo) -> Result<Photo, IoError> {
        self.with_conn(move |conn| {
            let [r, g, b] = match photo.dominant_color {
                Some([r, g, b]) => [Some(r), Some(g), Some(b)],
                None => [None, None, None],
            };
            conn.execute(
                "INSERT INTO photos (image_url, color_r, color_g, color_b, hidden)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![photo.image_url, r, g, b, photo.hidden],
            )?;
            photo.id = conn.last_insert_rowid();
            Ok(photo)
        })
        .await
    }

    async fn config(&self) -> Result<Option<MosaicConfig>, IoError> {
        self.with_conn(|conn| load_config(conn)).await
    }

    async fn save_config(&self, config: MosaicConfig) -> Result<MosaicConfig, IoError> {
        self.with_conn(move |conn| {
            store_config(conn, &config)?;
            Ok(config)
        })
        .await
    }

    async fn mark_run(&self, at: DateTime<Utc>) -> Result<(), IoError> {
        let found = self
            .with_conn(move |conn| match load_config(conn)? {
                Some(mut config) => {
                    config.last_run_at = Some(at);
                    store_config(conn, &config)?;
                    Ok(true)
                }
                None => Ok(false),
            })
            .await?;

        if found {
            Ok(())
        } else {
            Err(IoError::NotFound("mosaic config".to_string()))
        }
    }

    async fn insert_snapshot(&self, mut snapshot: MosaicSnapshot) -> Result<MosaicSnapshot, IoError> {
        self.with_conn(move |conn| {
            let config = serde_json::to_string(&snapshot.config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            conn.execute(
                "INSERT INTO snapshots (mosaic_key, url, public_id, width, height, tiles_count,
                                        format, config, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    snapshot.mosaic_key,
                    snapshot.url,
                    snapshot.public_id,
                    snapshot.width,
                    snapshot.height,
                    snapshot.tiles_count as i64,
                    snapshot.format,
                    config,
                    snapshot.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )?;
            snapshot.id = conn.last_insert_rowid();
            Ok(snapshot)
        })
        .await
    }

    async fn snapshots(&self, mosaic_key: Option<&str>) -> Result<Vec<MosaicSnapshot>, IoError> {
        let key = mosaic_key.map(str::to_string);
        self.with_conn(move |conn| {
            let snapshots = match key {
                Some(key) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM snapshots WHERE mosaic_key = ?1
                         ORDER BY created_at DESC, id DESC",
                        SNAPSHOT_COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![key], snapshot_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM snapshots ORDER BY created_at DESC, id DESC",
                        SNAPSHOT_COLUMNS
                    ))?;
                    let rows = stmt.query_map([], snapshot_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(snapshots)
        })
        .await
    }

    async fn snapshot(&self, id: i64) -> Result<Option<MosaicSnapshot>, IoError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM snapshots WHERE id = ?1", SNAPSHOT_COLUMNS),
                params![id],
                snapshot_from_row,
            )
            .optional()
        })
        .await
    }

    async fn delete_snapshot(&self, id: i64) -> Result<bool, IoError> {
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }
}
