use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::storage::{object_key, DestroyResult, ObjectStore, UploadOptions, UploadedObject};
use crate::error::IoError;
use crate::mosaic::codec;

/// S3-backed implementation of [`ObjectStore`].
///
/// Objects are written under `{folder}/{public_id}.{format}` and the full key
/// doubles as the public id, so destroy needs no extra bookkeeping.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    /// Create a store for `bucket`; public URLs are `{public_base_url}/{key}`.
    pub fn new(client: Client, bucket: String, public_base_url: impl Into<String>) -> Self {
        Self {
            client,
            bucket,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public URL for an object key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

fn content_type(format: &str) -> &'static str {
    match format.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, data: Bytes, options: UploadOptions) -> Result<UploadedObject, IoError> {
        let key = object_key(&options);
        let (width, height) = codec::dimensions(&data).unwrap_or((0, 0));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type(&options.format))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        debug!(bucket = %self.bucket, key = %key, "Uploaded object");

        Ok(UploadedObject {
            url: self.public_url(&key),
            public_id: key,
            width,
            height,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<DestroyResult, IoError> {
        // S3 deletes are idempotent, so check with HEAD first to report "not found"
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await;

        if let Err(e) = head {
            let is_not_found = e
                .as_service_error()
                .map(|se| se.is_not_found())
                .unwrap_or(false);
            let status_is_404 = e
                .raw_response()
                .map(|r| r.status().as_u16() == 404)
                .unwrap_or(false);

            if is_not_found || status_is_404 {
                return Ok(DestroyResult::NotFound);
            }
            return Err(IoError::S3(e.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        debug!(bucket = %self.bucket, key = %public_id, "Deleted object");
        Ok(DestroyResult::Ok)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
