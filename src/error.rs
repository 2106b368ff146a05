use std::fmt;

use thiserror::Error;

/// I/O errors from remote fetches, object storage and persistence
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    /// Fetch did not complete in time
    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Persistence layer failure
    #[error("Database error: {0}")]
    Database(String),
}

/// Pipeline stage an upstream failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Grid,
    Match,
    Render,
    Publish,
    Delete,
    Ingest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Grid => "grid",
            Stage::Match => "match",
            Stage::Render => "render",
            Stage::Publish => "publish",
            Stage::Delete => "delete",
            Stage::Ingest => "ingest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the mosaic pipeline operations
#[derive(Debug, Clone, Error)]
pub enum MosaicError {
    /// Caller-correctable input problem (maps to HTTP 400)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing tiles, photos, snapshot or config (maps to HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote fetch or object storage failure at the stage level
    #[error("{stage} stage failed for mosaic '{mosaic_key}': {source}")]
    Upstream {
        stage: Stage,
        mosaic_key: String,
        #[source]
        source: IoError,
    },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] IoError),

    /// Final composite could not be produced
    #[error("Image processing failed: {message}")]
    Image { message: String },
}

impl MosaicError {
    pub(crate) fn upstream(stage: Stage, mosaic_key: &str, source: IoError) -> Self {
        MosaicError::Upstream {
            stage,
            mosaic_key: mosaic_key.to_string(),
            source,
        }
    }

    pub(crate) fn image(message: impl fmt::Display) -> Self {
        MosaicError::Image {
            message: message.to_string(),
        }
    }
}
