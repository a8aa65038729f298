// Housekeeping - periodic cleanup of in-memory state

use crate::application::driver::SequenceDriver;
use crate::application::queue::{JobQueue, QueueStatus};
use crate::application::qualification::QualificationService;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{SendStep, SequenceStatus};
use crate::error::Result;
use crate::port::SequenceRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// What one housekeeping pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub cleared_jobs: usize,
    /// In-flight markers dropped for finished sends
    pub released_sends: usize,
    pub purged_cache_entries: usize,
    pub queue: QueueStatus,
    pub active_sequences: i64,
    pub paused_sequences: i64,
}

pub struct Housekeeping {
    queue: JobQueue<SendStep>,
    qualification: Option<Arc<QualificationService>>,
    driver: Option<Arc<SequenceDriver>>,
    repository: Arc<dyn SequenceRepository>,
    interval: Duration,
}

impl Housekeeping {
    pub fn new(
        queue: JobQueue<SendStep>,
        repository: Arc<dyn SequenceRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            qualification: None,
            driver: None,
            repository,
            interval,
        }
    }

    /// Also purge the lead cache on every pass
    pub fn with_lead_cache(mut self, qualification: Arc<QualificationService>) -> Self {
        self.qualification = Some(qualification);
        self
    }

    /// Also release the driver's markers for finished sends
    pub fn with_driver(mut self, driver: Arc<SequenceDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Run one pass now
    pub async fn run_now(&self) -> Result<HousekeepingReport> {
        let cleared_jobs = self.queue.clear_completed();
        let released_sends = self
            .driver
            .as_ref()
            .map(|d| d.prune_in_flight())
            .unwrap_or(0);
        let purged_cache_entries = self
            .qualification
            .as_ref()
            .map(|q| q.cache().clean())
            .unwrap_or(0);
        let queue = self.queue.get_status();
        let active_sequences = self.repository.count_by_status(SequenceStatus::Active).await?;
        let paused_sequences = self.repository.count_by_status(SequenceStatus::Paused).await?;

        info!(
            cleared_jobs = cleared_jobs,
            released_sends = released_sends,
            purged_cache_entries = purged_cache_entries,
            queued = queue.queued,
            failed = queue.failed,
            active = active_sequences,
            paused = paused_sequences,
            "Housekeeping completed"
        );

        Ok(HousekeepingReport {
            cleared_jobs,
            released_sends,
            purged_cache_entries,
            queue,
            active_sequences,
            paused_sequences,
        })
    }

    /// Run on the configured interval until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(interval_secs = self.interval.as_secs(), "Housekeeping started");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = ?e, "Housekeeping failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Housekeeping stopped");
                    break;
                }
            }
        }
    }
}
