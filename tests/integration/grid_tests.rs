//! Tile grid integration tests.
//!
//! Tests verify:
//! - Exact tiling of the reference image
//! - Overwrite replaces the previous grid
//! - Failure modes leave stored tiles untouched

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use photo_mosaic::error::{MosaicError, Stage};
use photo_mosaic::mosaic::GridRequest;
use photo_mosaic::store::MosaicStore;

use super::test_utils::{
    png, quadrant_harness, solid_png, Harness, MockFetcher, MockObjectStore, MAIN_IMAGE_URL,
};

fn request(tile: u32, overwrite: bool) -> GridRequest {
    GridRequest {
        main_image_url: MAIN_IMAGE_URL.to_string(),
        tile_width: tile,
        tile_height: tile,
        mosaic_key: "default".to_string(),
        overwrite,
    }
}

#[tokio::test]
async fn test_four_tiles_for_quadrant_image() {
    let harness = quadrant_harness().await;

    let summary = harness.service.generate_tiles(&request(50, true)).await.unwrap();
    assert_eq!((summary.rows, summary.cols, summary.count), (2, 2, 4));

    let tiles = harness.store.tiles("default").await.unwrap();
    let origins: Vec<(u32, u32)> = tiles.iter().map(|t| (t.left, t.top)).collect();
    assert_eq!(origins, vec![(0, 0), (50, 0), (0, 50), (50, 50)]);

    let colors: Vec<[u8; 3]> = tiles.iter().map(|t| t.color).collect();
    assert_eq!(
        colors,
        vec![[224, 0, 0], [0, 224, 0], [0, 0, 224], [224, 224, 0]]
    );
    assert!(tiles.iter().all(|t| t.matched_photo.is_none()));
}

#[tokio::test]
async fn test_clipped_edge_tiles() {
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, solid_png(45, 23, [10, 10, 10]))
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::new());

    let summary = harness.service.generate_tiles(&request(20, true)).await.unwrap();
    assert_eq!((summary.rows, summary.cols, summary.count), (2, 3, 6));

    let tiles = harness.store.tiles("default").await.unwrap();
    assert!(tiles.iter().all(|t| t.right() <= 45 && t.bottom() <= 23));
    let area: u32 = tiles.iter().map(|t| t.width * t.height).sum();
    assert_eq!(area, 45 * 23);

    let corner = tiles.iter().find(|t| t.row == 1 && t.col == 2).unwrap();
    assert_eq!((corner.width, corner.height), (5, 3));
}

#[tokio::test]
async fn test_overwrite_replaces_grid() {
    let harness = quadrant_harness().await;

    harness.service.generate_tiles(&request(50, true)).await.unwrap();
    let summary = harness.service.generate_tiles(&request(25, true)).await.unwrap();
    assert_eq!(summary.count, 16);
    assert_eq!(harness.store.tiles("default").await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_without_overwrite_duplicate_grid_fails() {
    let harness = quadrant_harness().await;

    harness.service.generate_tiles(&request(50, true)).await.unwrap();
    let result = harness.service.generate_tiles(&request(50, false)).await;
    assert!(matches!(result, Err(MosaicError::Storage(_))));
    assert_eq!(harness.store.tiles("default").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_invalid_input_before_any_fetch() {
    let harness = quadrant_harness().await;

    let mut missing = request(50, true);
    missing.main_image_url = String::new();
    assert!(matches!(
        harness.service.generate_tiles(&missing).await,
        Err(MosaicError::InvalidInput(_))
    ));

    let zero = request(0, true);
    assert!(matches!(
        harness.service.generate_tiles(&zero).await,
        Err(MosaicError::InvalidInput(_))
    ));

    assert_eq!(harness.fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_unreachable_image_keeps_previous_grid() {
    let harness = quadrant_harness().await;
    harness.service.generate_tiles(&request(50, true)).await.unwrap();

    let mut elsewhere = request(10, true);
    elsewhere.main_image_url = "https://images.example.com/gone.png".to_string();
    let result = harness.service.generate_tiles(&elsewhere).await;
    assert!(matches!(
        result,
        Err(MosaicError::Upstream {
            stage: Stage::Grid,
            ..
        })
    ));
    assert_eq!(harness.store.tiles("default").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_undecodable_image_is_invalid_input() {
    let harness = quadrant_harness().await;
    harness
        .fetcher
        .insert("https://images.example.com/broken.png", bytes::Bytes::from_static(b"nope"))
        .await;

    let mut broken = request(10, true);
    broken.main_image_url = "https://images.example.com/broken.png".to_string();
    assert!(matches!(
        harness.service.generate_tiles(&broken).await,
        Err(MosaicError::InvalidInput(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn test_large_grid_keeps_executor_responsive() {
    let noisy = RgbImage::from_fn(800, 800, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8])
    });
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, png(&noisy))
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::new());

    let done = Arc::new(AtomicBool::new(false));
    let ticker = {
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut worst = Duration::ZERO;
            let mut last = Instant::now();
            while !done.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let now = Instant::now();
                worst = worst.max(now - last);
                last = now;
            }
            worst
        })
    };

    let started = Instant::now();
    let summary = harness.service.generate_tiles(&request(8, true)).await.unwrap();
    let elapsed = started.elapsed();
    done.store(true, Ordering::SeqCst);
    let worst = ticker.await.unwrap();

    assert_eq!(summary.count, 10_000);
    // The ticker keeps running while the grid is cut on the blocking pool
    assert!(
        worst < Duration::from_millis(250) || worst < elapsed / 4,
        "executor stalled for {:?} of a {:?} build",
        worst,
        elapsed
    );
}
