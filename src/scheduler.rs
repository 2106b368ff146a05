//! Interval scheduler for the mosaic pipeline.
//!
//! A single polling loop checks the persisted configuration and triggers a
//! full run when it is enabled and due. At most one run is in flight: a tick
//! that finds the running flag set is skipped entirely. Pipeline failures are
//! logged and the next poll simply tries again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::model::{MosaicConfig, MosaicSnapshot};
use crate::mosaic::MosaicService;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Holds the running flag for the duration of one run.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another run was in flight
    Busy,
    NoConfig,
    Disabled,
    MissingImage,
    NotDue,
    Ran(Box<MosaicSnapshot>),
    Failed(String),
}

/// Whether a run is due at `now`.
///
/// A config that never ran is always due.
pub fn is_due(config: &MosaicConfig, now: DateTime<Utc>) -> bool {
    match config.last_run_at {
        None => true,
        Some(last) => {
            let interval = TimeDelta::hours(i64::from(config.interval_hours.max(1)));
            now - last >= interval
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    service: MosaicService,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(service: MosaicService, poll_interval: Duration) -> Self {
        Self {
            service,
            running: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Evaluate the schedule as of `now` and run the pipeline if due.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            debug!("Previous mosaic run still in flight, skipping tick");
            return TickOutcome::Busy;
        };

        let config = match self.service.config().await {
            Ok(Some(config)) => config,
            Ok(None) => return TickOutcome::NoConfig,
            Err(e) => {
                error!(error = %e, "Failed to load mosaic configuration");
                return TickOutcome::Failed(e.to_string());
            }
        };

        if !config.enabled {
            return TickOutcome::Disabled;
        }
        if config.main_image_url.is_empty() {
            return TickOutcome::MissingImage;
        }
        if !is_due(&config, now) {
            return TickOutcome::NotDue;
        }

        match self.service.run_pipeline(&config).await {
            Ok(snapshot) => TickOutcome::Ran(Box::new(snapshot)),
            Err(e) => {
                error!(mosaic_key = %config.mosaic_key, error = %e, "Scheduled mosaic run failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Start the polling loop. The first tick fires immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_secs = self.poll_interval.as_secs(),
                "Mosaic scheduler started"
            );
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let scheduler = self.clone();
                tokio::spawn(async move {
                    let outcome = scheduler.tick().await;
                    debug!(?outcome, "Scheduler tick finished");
                });
            }
        })
    }
}
