mod fetch;
mod s3_store;
mod storage;

pub use fetch::{HttpFetcher, ImageFetcher, DEFAULT_FETCH_TIMEOUT};
pub use s3_store::{create_s3_client, S3ObjectStore};
pub use storage::{object_key, DestroyResult, ObjectStore, UploadOptions, UploadedObject};
