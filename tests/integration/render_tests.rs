//! Render integration tests.
//!
//! Tests verify:
//! - Composite placement and scaling of fetched photos
//! - Flat-color fallback for failed or missing matches
//! - Publishing, snapshot records and the resolved configuration
//! - Overlay blending and its failure tolerance
//! - The full pipeline run

use std::sync::Arc;
use std::time::Duration;

use photo_mosaic::error::{MosaicError, Stage};
use photo_mosaic::model::{ConfigUpdate, DEFAULT_TILE_SIZE};
use photo_mosaic::mosaic::codec::{self, OutputFormat};
use photo_mosaic::mosaic::{GridRequest, PolicyOverrides};
use photo_mosaic::store::{MemoryStore, MosaicStore};

use super::test_utils::{
    quadrant_harness, quadrant_png, seed_photos, Harness, MockFetcher, MockObjectStore,
    MAIN_IMAGE_URL,
};

async fn grid_and_match(harness: &Harness) {
    harness
        .service
        .generate_tiles(&GridRequest {
            main_image_url: MAIN_IMAGE_URL.to_string(),
            tile_width: 50,
            tile_height: 50,
            mosaic_key: "default".to_string(),
            overwrite: true,
        })
        .await
        .unwrap();
    harness
        .service
        .match_tiles("default", &PolicyOverrides::default())
        .await
        .unwrap();
}

fn assert_close(actual: [u8; 3], expected: [u8; 3]) {
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (*a as i16 - e as i16).abs() <= 6,
            "{:?} vs {:?}",
            actual,
            expected
        );
    }
}

#[tokio::test]
async fn test_render_publishes_scaled_composite() {
    let harness = quadrant_harness().await;
    grid_and_match(&harness).await;

    let mut request = harness.service.render_request("default");
    request.output_width = Some(200.0);
    request.output_height = Some(200.0);
    request.format = OutputFormat::Png;

    let snapshot = harness.service.render(&request).await.unwrap();
    assert_eq!((snapshot.width, snapshot.height), (200, 200));
    assert_eq!(snapshot.tiles_count, 4);
    assert_eq!(snapshot.format, "png");
    assert!(snapshot.public_id.starts_with("Mosaic/renders/mosaic-default-"));
    assert_eq!(snapshot.config.output_width, 200);

    let stored = harness.objects.get(&snapshot.public_id).await.unwrap();
    assert_eq!(stored.options.format, "png");
    let canvas = codec::decode(&stored.data).unwrap().to_rgb8();
    assert_eq!(canvas.dimensions(), (200, 200));

    // Each quadrant doubled in place
    assert_close(canvas.get_pixel(50, 50).0, [224, 0, 0]);
    assert_close(canvas.get_pixel(150, 50).0, [0, 224, 0]);
    assert_close(canvas.get_pixel(50, 150).0, [0, 0, 224]);
    assert_close(canvas.get_pixel(150, 150).0, [224, 224, 0]);

    let latest = harness.service.latest_snapshot("default").await.unwrap();
    assert_eq!(latest, snapshot);
}

#[tokio::test]
async fn test_unmatched_and_unreachable_tiles_fall_back_to_color() {
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, quadrant_png())
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::new());
    // Photos exist in the store but their URLs are not served
    harness
        .store
        .insert_photo(photo_mosaic::model::Photo {
            id: 0,
            image_url: "https://photos.example.com/offline.png".to_string(),
            dominant_color: Some([0, 0, 0]),
            hidden: false,
        })
        .await
        .unwrap();
    grid_and_match(&harness).await;

    let mut request = harness.service.render_request("default");
    request.format = OutputFormat::Png;
    let snapshot = harness.service.render(&request).await.unwrap();

    let stored = harness.objects.get(&snapshot.public_id).await.unwrap();
    let canvas = codec::decode(&stored.data).unwrap().to_rgb8();
    assert_eq!(canvas.dimensions(), (100, 100));
    assert_eq!(canvas.get_pixel(25, 25).0, [224, 0, 0]);
    assert_eq!(canvas.get_pixel(75, 75).0, [224, 224, 0]);
}

#[tokio::test]
async fn test_slow_fetch_times_out_per_tile() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, quadrant_png())
        .await;
    let harness = Harness::with_store(Arc::clone(&store), fetcher, MockObjectStore::new());
    seed_photos(&store, &harness.fetcher, &[[224, 0, 0]]).await;
    grid_and_match(&harness).await;

    // Same store, a fetcher slower than the 2s timeout
    let slow = harness.fetcher.clone().with_delay(Duration::from_secs(5));
    let slow_harness = Harness::with_store(store, slow, MockObjectStore::new());

    let mut request = slow_harness.service.render_request("default");
    request.format = OutputFormat::Png;
    request.concurrency = Some(4);
    let snapshot = slow_harness.service.render(&request).await.unwrap();

    let stored = slow_harness.objects.get(&snapshot.public_id).await.unwrap();
    let canvas = codec::decode(&stored.data).unwrap().to_rgb8();
    assert_eq!(canvas.get_pixel(75, 25).0, [0, 224, 0]);
}

#[tokio::test]
async fn test_render_rejects_bad_sizes_and_missing_tiles() {
    let harness = quadrant_harness().await;
    grid_and_match(&harness).await;

    let mut request = harness.service.render_request("default");
    request.output_width = Some(-10.0);
    assert!(matches!(
        harness.service.render(&request).await,
        Err(MosaicError::InvalidInput(_))
    ));

    request.output_width = Some(f64::NAN);
    assert!(matches!(
        harness.service.render(&request).await,
        Err(MosaicError::InvalidInput(_))
    ));

    let missing = harness.service.render_request("elsewhere");
    assert!(matches!(
        harness.service.render(&missing).await,
        Err(MosaicError::NotFound(_))
    ));
    assert!(harness.objects.uploads().await.is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_publish_error() {
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, quadrant_png())
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::failing_uploads());
    seed_photos(&harness.store, &harness.fetcher, &[[224, 0, 0]]).await;
    grid_and_match(&harness).await;

    let result = harness
        .service
        .render(&harness.service.render_request("default"))
        .await;
    assert!(matches!(
        result,
        Err(MosaicError::Upstream {
            stage: Stage::Publish,
            ..
        })
    ));
    assert!(harness.store.snapshots(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overlay_blends_reference_and_tolerates_failure() {
    let harness = quadrant_harness().await;
    grid_and_match(&harness).await;
    harness
        .fetcher
        .insert(
            "https://images.example.com/white.png",
            super::test_utils::solid_png(10, 10, [255, 255, 255]),
        )
        .await;

    let mut request = harness.service.render_request("default");
    request.format = OutputFormat::Png;
    request.overlay_opacity = Some(1.0);
    request.overlay_image_url = Some("https://images.example.com/white.png".to_string());
    let snapshot = harness.service.render(&request).await.unwrap();
    assert_eq!(snapshot.config.overlay_opacity, 1.0);

    let stored = harness.objects.get(&snapshot.public_id).await.unwrap();
    let canvas = codec::decode(&stored.data).unwrap().to_rgb8();
    assert_eq!(canvas.get_pixel(25, 25).0, [255, 255, 255]);

    // Unreachable reference image: rendering still succeeds
    request.overlay_image_url = Some("https://images.example.com/missing.png".to_string());
    let snapshot = harness.service.render(&request).await.unwrap();
    let stored = harness.objects.get(&snapshot.public_id).await.unwrap();
    let canvas = codec::decode(&stored.data).unwrap().to_rgb8();
    assert_close(canvas.get_pixel(25, 25).0, [224, 0, 0]);
}

#[tokio::test]
async fn test_pipeline_run_stamps_last_run() {
    let harness = quadrant_harness().await;
    let config = harness
        .service
        .update_config(ConfigUpdate {
            enabled: Some(true),
            main_image_url: Some(MAIN_IMAGE_URL.to_string()),
            tile_width: Some(25),
            tile_height: Some(25),
            mosaic_size: Some(300),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(config.last_run_at.is_none());

    let snapshot = harness.service.run_pipeline(&config).await.unwrap();
    assert_eq!((snapshot.width, snapshot.height), (300, 300));
    assert_eq!(snapshot.tiles_count, 16);
    assert_eq!(snapshot.config.tile_width, Some(25));
    assert_eq!(snapshot.format, "jpg");

    let saved = harness.store.config().await.unwrap().unwrap();
    assert!(saved.last_run_at.is_some());
    assert!(harness
        .store
        .tiles("default")
        .await
        .unwrap()
        .iter()
        .all(|t| t.matched_photo.is_some()));
}

#[tokio::test]
async fn test_snapshot_records_persisted_policy() {
    let harness = quadrant_harness().await;
    harness
        .service
        .update_config(ConfigUpdate {
            max_uses_per_photo: Some(Some(2)),
            ..Default::default()
        })
        .await
        .unwrap();
    harness
        .service
        .generate_tiles(&GridRequest {
            main_image_url: MAIN_IMAGE_URL.to_string(),
            tile_width: 50,
            tile_height: 50,
            mosaic_key: "default".to_string(),
            overwrite: true,
        })
        .await
        .unwrap();

    // Ad-hoc match with a stricter policy than the saved one
    let summary = harness
        .service
        .match_tiles(
            "default",
            &PolicyOverrides {
                allow_reuse: Some(false),
                max_uses_per_photo: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!summary.policy.allow_reuse);

    let snapshot = harness
        .service
        .render(&harness.service.render_request("default"))
        .await
        .unwrap();
    assert!(snapshot.config.allow_reuse);
    assert_eq!(snapshot.config.max_uses_per_photo, Some(2));
    assert_eq!(snapshot.config.tile_width, Some(DEFAULT_TILE_SIZE));
}
