//! Match engine integration tests.
//!
//! Tests verify:
//! - Persisted assignments and their URLs
//! - Reuse policies against the stored photo pool
//! - Missing tiles or photos fail without mutating anything

use std::collections::HashMap;

use photo_mosaic::error::MosaicError;
use photo_mosaic::model::{ConfigUpdate, Photo};
use photo_mosaic::mosaic::{GridRequest, PolicyOverrides};
use photo_mosaic::store::MosaicStore;

use super::test_utils::{
    photo_url, quadrant_harness, quadrant_png, Harness, MockFetcher, MockObjectStore,
    MAIN_IMAGE_URL,
};

async fn build_grid(harness: &Harness, tile: u32) {
    harness
        .service
        .generate_tiles(&GridRequest {
            main_image_url: MAIN_IMAGE_URL.to_string(),
            tile_width: tile,
            tile_height: tile,
            mosaic_key: "default".to_string(),
            overwrite: true,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exact_colors_match_their_photos() {
    let harness = quadrant_harness().await;
    build_grid(&harness, 50).await;

    let summary = harness
        .service
        .match_tiles("default", &PolicyOverrides::default())
        .await
        .unwrap();
    assert_eq!(summary.matched, 4);
    assert_eq!(summary.mosaic_key, "default");

    let photos: HashMap<i64, Photo> = harness
        .store
        .photos()
        .await
        .unwrap()
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    for tile in harness.store.tiles("default").await.unwrap() {
        let photo = &photos[&tile.matched_photo.unwrap()];
        assert_eq!(photo.dominant_color, Some(tile.color));
        assert_eq!(tile.matched_url, photo.image_url);
    }
}

#[tokio::test]
async fn test_no_reuse_uses_each_photo_once() {
    let harness = quadrant_harness().await;
    // 16 tiles, 4 seeded photos + 12 extra
    let extra: Vec<[u8; 3]> = (0..12u8).map(|i| [i * 20, 100, 255 - i * 20]).collect();
    for color in &extra {
        harness
            .store
            .insert_photo(Photo {
                id: 0,
                image_url: format!("https://photos.example.com/extra-{:?}.png", color),
                dominant_color: Some(*color),
                hidden: false,
            })
            .await
            .unwrap();
    }
    build_grid(&harness, 25).await;

    let overrides = PolicyOverrides {
        allow_reuse: Some(false),
        min_use_once: Some(true),
        ..Default::default()
    };
    let summary = harness.service.match_tiles("default", &overrides).await.unwrap();
    assert_eq!(summary.matched, 16);
    assert!(!summary.policy.allow_reuse);

    let mut uses: HashMap<i64, usize> = HashMap::new();
    for tile in harness.store.tiles("default").await.unwrap() {
        *uses.entry(tile.matched_photo.unwrap()).or_insert(0) += 1;
    }
    assert_eq!(uses.len(), 16);
    assert!(uses.values().all(|&n| n == 1));
}

#[tokio::test]
async fn test_cap_respected_with_enough_photos() {
    let harness = quadrant_harness().await;
    build_grid(&harness, 25).await;

    let overrides = PolicyOverrides {
        max_uses_per_photo: Some(4),
        ..Default::default()
    };
    let summary = harness.service.match_tiles("default", &overrides).await.unwrap();
    assert_eq!(summary.matched, 16);
    assert_eq!(summary.policy.max_uses_per_photo, Some(4));

    let mut uses: HashMap<i64, usize> = HashMap::new();
    for tile in harness.store.tiles("default").await.unwrap() {
        *uses.entry(tile.matched_photo.unwrap()).or_insert(0) += 1;
    }
    assert!(uses.values().all(|&n| n <= 4));
}

#[tokio::test]
async fn test_persisted_policy_is_the_base() {
    let harness = quadrant_harness().await;
    build_grid(&harness, 50).await;
    harness
        .service
        .update_config(ConfigUpdate {
            allow_reuse: Some(false),
            match_pool_size: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    let summary = harness
        .service
        .match_tiles(
            "default",
            &PolicyOverrides {
                match_pool_size: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!summary.policy.allow_reuse);
    assert_eq!(summary.policy.match_pool_size, 3);
}

#[tokio::test]
async fn test_zero_eligible_photos_is_not_found() {
    let fetcher = MockFetcher::new()
        .with_image(MAIN_IMAGE_URL, quadrant_png())
        .await;
    let harness = Harness::new(fetcher, MockObjectStore::new());
    harness
        .store
        .insert_photo(Photo {
            id: 0,
            image_url: photo_url(1),
            dominant_color: Some([10, 10, 10]),
            hidden: true,
        })
        .await
        .unwrap();
    harness
        .store
        .insert_photo(Photo {
            id: 0,
            image_url: photo_url(2),
            dominant_color: None,
            hidden: false,
        })
        .await
        .unwrap();
    build_grid(&harness, 50).await;

    let before = harness.store.tiles("default").await.unwrap();
    let result = harness
        .service
        .match_tiles("default", &PolicyOverrides::default())
        .await;
    assert!(matches!(result, Err(MosaicError::NotFound(_))));
    assert_eq!(harness.store.tiles("default").await.unwrap(), before);
}

#[tokio::test]
async fn test_missing_tiles_is_not_found() {
    let harness = quadrant_harness().await;
    let result = harness
        .service
        .match_tiles("nothing-here", &PolicyOverrides::default())
        .await;
    assert!(matches!(result, Err(MosaicError::NotFound(_))));
}
