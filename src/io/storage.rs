use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::IoError;

/// Where and how to store an uploaded image.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Folder (key prefix) inside the storage namespace
    pub folder: String,

    /// Object name without folder or extension
    pub public_id: String,

    /// File extension / format name (e.g. "jpg", "png")
    pub format: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    /// Publicly reachable URL of the object
    pub url: String,

    /// Identifier to pass back to [`ObjectStore::destroy`]
    pub public_id: String,

    /// Pixel width, 0 when the bytes could not be inspected
    pub width: u32,

    /// Pixel height, 0 when the bytes could not be inspected
    pub height: u32,
}

/// Outcome of a destroy call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyResult {
    Ok,
    NotFound,
    /// Storage answered with something other than "ok"/"not found"
    Other(String),
}

impl DestroyResult {
    /// Whether the object is gone (or was never there).
    pub fn is_released(&self) -> bool {
        matches!(self, DestroyResult::Ok | DestroyResult::NotFound)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DestroyResult::Ok => "ok",
            DestroyResult::NotFound => "not found",
            DestroyResult::Other(result) => result,
        }
    }
}

/// Durable object storage for rendered mosaics and uploaded main images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, data: Bytes, options: UploadOptions) -> Result<UploadedObject, IoError>;

    async fn destroy(&self, public_id: &str) -> Result<DestroyResult, IoError>;
}

/// Join folder, name and extension into an object key.
pub fn object_key(options: &UploadOptions) -> String {
    let folder = options.folder.trim_matches('/');
    let extension = options.format.trim_start_matches('.');
    let file = if extension.is_empty() {
        options.public_id.clone()
    } else {
        format!("{}.{}", options.public_id, extension)
    };

    if folder.is_empty() {
        file
    } else {
        format!("{}/{}", folder, file)
    }
}
