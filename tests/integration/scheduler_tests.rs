//! Scheduler integration tests.
//!
//! Tests verify:
//! - A due configuration runs exactly once and stamps `lastRunAt`
//! - Disabled, missing or not-due configurations never run
//! - Failed runs are swallowed and retried on the next tick

use chrono::{TimeDelta, Utc};
use std::time::Duration;

use photo_mosaic::model::{ConfigUpdate, MosaicConfig};
use photo_mosaic::scheduler::{Scheduler, TickOutcome};
use photo_mosaic::store::MosaicStore;

use super::test_utils::{quadrant_harness, Harness, MAIN_IMAGE_URL};

async fn save_enabled_config(harness: &Harness) -> MosaicConfig {
    harness
        .service
        .update_config(ConfigUpdate {
            enabled: Some(true),
            main_image_url: Some(MAIN_IMAGE_URL.to_string()),
            tile_width: Some(50),
            tile_height: Some(50),
            mosaic_size: Some(100),
            interval_hours: Some(24),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_due_config_runs_once() {
    let harness = quadrant_harness().await;
    let mut config = save_enabled_config(&harness).await;
    let now = Utc::now();
    config.last_run_at = Some(now - TimeDelta::hours(25));
    harness.store.save_config(config).await.unwrap();

    let scheduler = Scheduler::new(harness.service.clone(), Duration::from_secs(60));

    let outcome = scheduler.tick_at(now).await;
    assert!(matches!(outcome, TickOutcome::Ran(_)), "{:?}", outcome);
    assert_eq!(harness.store.snapshots(None).await.unwrap().len(), 1);

    let saved = harness.store.config().await.unwrap().unwrap();
    let last_run = saved.last_run_at.unwrap();
    assert!(last_run >= now);

    // Immediately again: not due
    assert_eq!(scheduler.tick().await, TickOutcome::NotDue);
    assert_eq!(harness.store.snapshots(None).await.unwrap().len(), 1);
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_skips_without_runnable_config() {
    let harness = quadrant_harness().await;
    let scheduler = Scheduler::new(harness.service.clone(), Duration::from_secs(60));

    assert_eq!(scheduler.tick().await, TickOutcome::NoConfig);

    harness
        .service
        .update_config(ConfigUpdate {
            main_image_url: Some(MAIN_IMAGE_URL.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(scheduler.tick().await, TickOutcome::Disabled);

    let mut config = harness.store.config().await.unwrap().unwrap();
    config.enabled = true;
    config.main_image_url = String::new();
    harness.store.save_config(config).await.unwrap();
    assert_eq!(scheduler.tick().await, TickOutcome::MissingImage);

    assert!(harness.store.snapshots(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_run_is_retried_next_tick() {
    let harness = quadrant_harness().await;
    let mut config = save_enabled_config(&harness).await;
    config.main_image_url = "https://images.example.com/not-yet.png".to_string();
    harness.store.save_config(config).await.unwrap();

    let scheduler = Scheduler::new(harness.service.clone(), Duration::from_secs(60));
    assert!(matches!(scheduler.tick().await, TickOutcome::Failed(_)));
    assert!(harness.store.config().await.unwrap().unwrap().last_run_at.is_none());

    harness
        .fetcher
        .insert("https://images.example.com/not-yet.png", super::test_utils::quadrant_png())
        .await;
    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(_)));
}

#[tokio::test]
async fn test_spawned_loop_fires_first_tick_immediately() {
    let harness = quadrant_harness().await;
    save_enabled_config(&harness).await;

    let handle = Scheduler::new(harness.service.clone(), Duration::from_secs(3600)).spawn();

    let mut ran = false;
    for _ in 0..100 {
        if !harness.store.snapshots(None).await.unwrap().is_empty() {
            ran = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle.abort();
    assert!(ran);
}
