//! Test utilities for integration tests.
//!
//! Mock implementations of the fetch and object storage seams plus helpers
//! for building small encoded images and wired-up services.

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use photo_mosaic::error::IoError;
use photo_mosaic::io::{DestroyResult, ImageFetcher, ObjectStore, UploadOptions, UploadedObject};
use photo_mosaic::model::{Photo, Rgb as Color};
use photo_mosaic::mosaic::{MosaicService, ServiceSettings};
use photo_mosaic::store::{MemoryStore, MosaicStore};

pub const MAIN_IMAGE_URL: &str = "https://images.example.com/main.png";

// =============================================================================
// Image helpers
// =============================================================================

pub fn png(image: &RgbImage) -> Bytes {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

pub fn solid_png(width: u32, height: u32, color: Color) -> Bytes {
    png(&RgbImage::from_pixel(width, height, Rgb(color)))
}

/// A 100×100 image with four solid quadrants.
pub fn quadrant_png() -> Bytes {
    png(&RgbImage::from_fn(100, 100, |x, y| match (x < 50, y < 50) {
        (true, true) => Rgb([240, 16, 16]),
        (false, true) => Rgb([16, 240, 16]),
        (true, false) => Rgb([16, 16, 240]),
        (false, false) => Rgb([240, 240, 16]),
    }))
}

pub fn photo_url(id: usize) -> String {
    format!("https://photos.example.com/{}.png", id)
}

// =============================================================================
// Mock Fetcher
// =============================================================================

/// Serves registered URLs from memory and counts requests.
#[derive(Clone, Default)]
pub struct MockFetcher {
    images: Arc<RwLock<HashMap<String, Bytes>>>,
    request_count: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_image(self, url: impl Into<String>, data: Bytes) -> Self {
        self.images.write().await.insert(url.into(), data);
        self
    }

    /// Delay every response, to exercise fetch timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn insert(&self, url: impl Into<String>, data: Bytes) {
        self.images.write().await.insert(url.into(), data);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.images
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| IoError::NotFound(url.to_string()))
    }
}

// =============================================================================
// Mock Object Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub options: UploadOptions,
    pub data: Bytes,
}

/// Records uploads in memory; destroy answers are configurable.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    destroyed: Arc<RwLock<Vec<String>>>,
    destroy_answer: Arc<RwLock<Option<DestroyResult>>>,
    fail_uploads: bool,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    /// Force every destroy call to answer `result`.
    pub async fn answer_destroy_with(&self, result: DestroyResult) {
        *self.destroy_answer.write().await = Some(result);
    }

    pub async fn get(&self, public_id: &str) -> Option<StoredObject> {
        self.objects.read().await.get(public_id).cloned()
    }

    pub async fn uploads(&self) -> Vec<StoredObject> {
        self.objects.read().await.values().cloned().collect()
    }

    pub async fn destroyed(&self) -> Vec<String> {
        self.destroyed.read().await.clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn upload(&self, data: Bytes, options: UploadOptions) -> Result<UploadedObject, IoError> {
        if self.fail_uploads {
            return Err(IoError::S3("upload rejected".to_string()));
        }
        let public_id = format!("{}/{}", options.folder, options.public_id);
        let (width, height) = photo_mosaic::mosaic::codec::dimensions(&data).unwrap_or((0, 0));
        self.objects.write().await.insert(
            public_id.clone(),
            StoredObject {
                options: options.clone(),
                data,
            },
        );
        Ok(UploadedObject {
            url: format!("https://cdn.example.com/{}.{}", public_id, options.format),
            public_id,
            width,
            height,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<DestroyResult, IoError> {
        if let Some(answer) = self.destroy_answer.read().await.clone() {
            return Ok(answer);
        }
        self.destroyed.write().await.push(public_id.to_string());
        match self.objects.write().await.remove(public_id) {
            Some(_) => Ok(DestroyResult::Ok),
            None => Ok(DestroyResult::NotFound),
        }
    }
}

// =============================================================================
// Service wiring
// =============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub fetcher: MockFetcher,
    pub objects: MockObjectStore,
    pub service: MosaicService,
}

impl Harness {
    pub fn new(fetcher: MockFetcher, objects: MockObjectStore) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), fetcher, objects)
    }

    pub fn with_store(store: Arc<MemoryStore>, fetcher: MockFetcher, objects: MockObjectStore) -> Self {
        let settings = ServiceSettings {
            fetch_timeout: Duration::from_secs(2),
            ..ServiceSettings::default()
        };
        let service = MosaicService::new(
            Arc::clone(&store) as Arc<dyn MosaicStore>,
            Arc::new(fetcher.clone()),
            Arc::new(objects.clone()),
            settings,
        );
        Self {
            store,
            fetcher,
            objects,
            service,
        }
    }
}

/// Register `colors.len()` solid photos with the fetcher and the store.
pub async fn seed_photos(store: &MemoryStore, fetcher: &MockFetcher, colors: &[Color]) -> Vec<Photo> {
    let mut photos = Vec::new();
    for (i, color) in colors.iter().enumerate() {
        let url = photo_url(i);
        fetcher.insert(url.clone(), solid_png(16, 16, *color)).await;
        let photo = store
            .insert_photo(Photo {
                id: 0,
                image_url: url,
                dominant_color: Some(*color),
                hidden: false,
            })
            .await
            .unwrap();
        photos.push(photo);
    }
    photos
}

/// A harness with the quadrant main image registered and four matching photos.
pub async fn quadrant_harness() -> Harness {
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, quadrant_png())
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::new());
    seed_photos(
        &harness.store,
        &harness.fetcher,
        &[[224, 0, 0], [0, 224, 0], [0, 0, 224], [224, 224, 0]],
    )
    .await;
    harness
}
