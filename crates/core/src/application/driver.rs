//! Sequence Driver - the periodic due-check
//!
//! Selects Active sequences whose `next_send_at` has elapsed and enqueues one
//! "send step N" job per contact on the email queue. `run_waves` paces the
//! same work through the WaveDispatcher and waits for every job's outcome.

use crate::application::queue::JobQueue;
use crate::application::wave::{WaveDispatcher, WaveReport};
use crate::domain::{ContactId, JobId, JobState, SendStep, SequenceState};
use crate::error::{AppError, Result};
use crate::port::{CrmPropertyStore, SequenceRepository, TimeProvider};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Where due contacts come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueSource {
    /// Query the local sequence store
    #[default]
    Repository,
    /// Ask the CRM, then re-validate against the local store
    Crm,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub due_source: DueSource,
    /// Maximum contacts picked up per due-check
    pub due_batch_limit: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            due_source: DueSource::Repository,
            due_batch_limit: 500,
        }
    }
}

pub struct SequenceDriver {
    repository: Arc<dyn SequenceRepository>,
    crm: Option<Arc<dyn CrmPropertyStore>>,
    queue: JobQueue<SendStep>,
    waves: WaveDispatcher,
    time_provider: Arc<dyn TimeProvider>,
    config: DriverConfig,
    /// Last job enqueued per contact
    in_flight: Mutex<HashMap<ContactId, JobId>>,
}

impl SequenceDriver {
    pub fn new(
        repository: Arc<dyn SequenceRepository>,
        queue: JobQueue<SendStep>,
        waves: WaveDispatcher,
        time_provider: Arc<dyn TimeProvider>,
        config: DriverConfig,
    ) -> Self {
        Self {
            repository,
            crm: None,
            queue,
            waves,
            time_provider,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmPropertyStore>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn queue(&self) -> &JobQueue<SendStep> {
        &self.queue
    }

    /// Due sequences from the configured source, oldest first
    async fn due_sequences(&self) -> Result<Vec<SequenceState>> {
        let now = self.time_provider.now_millis();
        let limit = self.config.due_batch_limit;

        match self.config.due_source {
            DueSource::Repository => self.repository.find_due(now, limit).await,
            DueSource::Crm => {
                let crm = self.crm.as_ref().ok_or_else(|| {
                    AppError::Config("due_source = crm requires a CRM store".to_string())
                })?;
                let ids = crm.contacts_due_for_step(None).await?;

                let mut due = Vec::new();
                for id in ids {
                    match self.repository.find_by_contact(&id).await? {
                        Some(state) if state.is_due(now) => due.push(state),
                        Some(_) => debug!(contact_id = %id, "CRM says due, local state disagrees"),
                        None => warn!(contact_id = %id, "CRM contact has no local sequence"),
                    }
                }
                due.sort_by(|a, b| {
                    a.next_send_at
                        .cmp(&b.next_send_at)
                        .then_with(|| a.contact_id.cmp(&b.contact_id))
                });
                due.truncate(limit);
                Ok(due)
            }
        }
    }

    /// True if the contact's last job has not reached a terminal state
    fn has_in_flight(&self, contact_id: &str) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let pending = in_flight
            .get(contact_id)
            .and_then(|job_id| self.queue.get(job_id))
            .is_some_and(|job| !job.state.is_terminal());
        if !pending {
            in_flight.remove(contact_id);
        }
        pending
    }

    /// Forget contacts whose last job is terminal or no longer in the queue
    pub fn prune_in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let before = in_flight.len();
        in_flight.retain(|_, job_id| {
            self.queue
                .get(job_id)
                .is_some_and(|job| !job.state.is_terminal())
        });
        before - in_flight.len()
    }

    /// Drop the contact's entry if it still points at `job_id`
    fn release(&self, contact_id: &str, job_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(contact_id).is_some_and(|id| id == job_id) {
            in_flight.remove(contact_id);
        }
    }

    /// Whether the sequence moved past `step`, read back from the store
    async fn advanced_past(&self, contact_id: &str, step: u32) -> bool {
        match self.repository.find_by_contact(contact_id).await {
            Ok(Some(state)) => state.current_step > step,
            Ok(None) => false,
            Err(e) => {
                warn!(contact_id = %contact_id, error = %e, "Cannot read back sequence");
                false
            }
        }
    }

    /// Due sequences without a job already queued or running
    async fn eligible(&self) -> Result<Vec<SequenceState>> {
        let pruned = self.prune_in_flight();
        if pruned > 0 {
            debug!(pruned = pruned, "Released finished sends");
        }
        let due = self.due_sequences().await?;
        let total = due.len();
        let eligible: Vec<_> = due
            .into_iter()
            .filter(|state| {
                let busy = self.has_in_flight(&state.contact_id);
                if busy {
                    debug!(contact_id = %state.contact_id, "Send already in flight, skipping");
                }
                !busy
            })
            .collect();
        debug!(due = total, eligible = eligible.len(), "Due-check");
        Ok(eligible)
    }

    /// Enqueue a send job for a single step
    pub fn enqueue_send(&self, step: SendStep) -> JobId {
        let contact_id = step.contact_id.clone();
        let step_no = step.step;
        let job_id = self.queue.add(step);
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contact_id.clone(), job_id.clone());
        debug!(contact_id = %contact_id, step = step_no, job_id = %job_id, "Send enqueued");
        job_id
    }

    /// Enqueue one job per due contact; returns the new job ids
    pub async fn due_check(&self) -> Result<Vec<JobId>> {
        let job_ids: Vec<JobId> = self
            .eligible()
            .await?
            .iter()
            .map(|state| self.enqueue_send(SendStep::from(state)))
            .collect();
        if !job_ids.is_empty() {
            info!(enqueued = job_ids.len(), "Due-check enqueued sends");
        }
        Ok(job_ids)
    }

    /// Due-check paced through waves, waiting for each job's outcome
    pub async fn run_waves(&self) -> Result<WaveReport> {
        let due = self.eligible().await?;
        if due.is_empty() {
            debug!("Nothing due");
            return Ok(WaveReport::default());
        }

        info!(due = due.len(), "Starting wave dispatch");
        let report = self
            .waves
            .dispatch(due, |state: SequenceState| async move {
                let step = SendStep::from(&state);
                let step_no = step.step;
                let job_id = self.enqueue_send(step);
                let sent = match self.queue.wait_for(&job_id).await {
                    Some(job) => job.state == JobState::Completed,
                    // Cleared before we looked; the store knows the outcome
                    None => self.advanced_past(&state.contact_id, step_no).await,
                };
                self.release(&state.contact_id, &job_id);
                sent
            })
            .await;

        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            waves = report.waves,
            "Wave dispatch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::{JobContext, JobProcessor, ProcessError, QueueConfig};
    use crate::application::wave::WaveConfig;
    use crate::domain::{LeadType, TemplateSet};
    use crate::port::crm_store::mocks::RecordingCrmStore;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::sequence_repository::mocks::InMemorySequenceRepository;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobProcessor<SendStep> for Recorder {
        async fn process(&self, ctx: &JobContext<SendStep>) -> std::result::Result<(), ProcessError> {
            self.sent.lock().unwrap().push(ctx.payload.contact_id.clone());
            Ok(())
        }
    }

    /// Advances the stored sequence like a real send would
    struct Advancer {
        repo: Arc<InMemorySequenceRepository>,
    }

    #[async_trait]
    impl JobProcessor<SendStep> for Advancer {
        async fn process(&self, ctx: &JobContext<SendStep>) -> std::result::Result<(), ProcessError> {
            let mut state = self
                .repo
                .find_by_contact(&ctx.payload.contact_id)
                .await?
                .ok_or_else(|| ProcessError::permanent("no sequence"))?;
            state
                .advance(ctx.payload.step, 0, 1_000)
                .map_err(|e| ProcessError::permanent(e.to_string()))?;
            self.repo.update(&state).await?;
            Ok(())
        }
    }

    fn in_flight_len(driver: &SequenceDriver) -> usize {
        driver.in_flight.lock().unwrap().len()
    }

    struct Fixture {
        clock: Arc<ManualTimeProvider>,
        repo: Arc<InMemorySequenceRepository>,
        queue: JobQueue<SendStep>,
    }

    async fn fixture(contacts: &[&str]) -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let repo = Arc::new(InMemorySequenceRepository::new());
        for id in contacts {
            let state = SequenceState::enroll(
                *id,
                format!("{}@acme.com", id),
                LeadType::B2b,
                TemplateSet::new(TemplateSet::B2B),
                0,
            );
            repo.insert(&state).await.unwrap();
        }
        let queue = JobQueue::new(
            QueueConfig::named("email-sending"),
            Arc::new(SequentialIdProvider::default()),
            clock.clone(),
        );
        Fixture { clock, repo, queue }
    }

    fn driver(f: &Fixture, waves: WaveConfig, config: DriverConfig) -> SequenceDriver {
        SequenceDriver::new(
            f.repo.clone(),
            f.queue.clone(),
            WaveDispatcher::new(waves),
            f.clock.clone(),
            config,
        )
    }

    #[tokio::test]
    async fn test_due_check_enqueues_step_per_contact() {
        let f = fixture(&["a", "b"]).await;
        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());

        let jobs = driver.due_check().await.unwrap();
        assert_eq!(jobs.len(), 2);
        let payload = f.queue.get(&jobs[0]).unwrap().payload;
        assert_eq!(payload.contact_id, "a");
        assert_eq!(payload.step, 1);
        assert_eq!(payload.template_set.as_str(), TemplateSet::B2B);
    }

    #[tokio::test]
    async fn test_second_due_check_does_not_duplicate_in_flight() {
        // No processor registered: jobs stay queued
        let f = fixture(&["a"]).await;
        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());

        assert_eq!(driver.due_check().await.unwrap().len(), 1);
        assert!(driver.due_check().await.unwrap().is_empty());
        assert_eq!(f.queue.get_status().total, 1);
    }

    #[tokio::test]
    async fn test_not_yet_due_is_skipped() {
        let f = fixture(&["a"]).await;
        let mut state = f.repo.find_by_contact("a").await.unwrap().unwrap();
        state.next_send_at = 1_000;
        f.repo.update(&state).await.unwrap();

        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());
        assert!(driver.due_check().await.unwrap().is_empty());

        f.clock.set(1_000);
        assert_eq!(driver.due_check().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crm_source_revalidates_against_repository() {
        let f = fixture(&["a", "b"]).await;
        let mut paused = f.repo.find_by_contact("b").await.unwrap().unwrap();
        paused.pause("bounced", 0).unwrap();
        f.repo.update(&paused).await.unwrap();

        let crm = Arc::new(RecordingCrmStore::new());
        crm.set_due(vec![
            ("a".to_string(), TemplateSet::new(TemplateSet::B2B)),
            ("b".to_string(), TemplateSet::new(TemplateSet::B2B)),
            ("ghost".to_string(), TemplateSet::new(TemplateSet::B2B)),
        ]);
        let driver = driver(
            &f,
            WaveConfig::default(),
            DriverConfig {
                due_source: DueSource::Crm,
                ..DriverConfig::default()
            },
        )
        .with_crm(crm);

        let jobs = driver.due_check().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(f.queue.get(&jobs[0]).unwrap().payload.contact_id, "a");
    }

    #[tokio::test]
    async fn test_crm_source_without_crm_is_config_error() {
        let f = fixture(&["a"]).await;
        let driver = driver(
            &f,
            WaveConfig::default(),
            DriverConfig {
                due_source: DueSource::Crm,
                ..DriverConfig::default()
            },
        );
        assert!(matches!(driver.due_check().await, Err(AppError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waves_reports_each_wave() {
        let f = fixture(&["a", "b", "c", "d", "e"]).await;
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
        });
        f.queue.register_processor(recorder.clone());
        let driver = driver(
            &f,
            WaveConfig {
                size: 2,
                delay: Duration::from_secs(60),
                concurrency: 2,
            },
            DriverConfig::default(),
        );

        let report = driver.run_waves().await.unwrap();
        assert_eq!(report.waves, 3);
        assert_eq!(report.sent, 5);
        assert_eq!(report.failed, 0);

        let mut sent = recorder.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_finished_sends_release_in_flight_markers() {
        let f = fixture(&["a", "b", "c"]).await;
        f.queue.register_processor(Arc::new(Advancer {
            repo: f.repo.clone(),
        }));
        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());

        assert_eq!(driver.due_check().await.unwrap().len(), 3);
        f.queue.wait_idle().await;
        assert_eq!(f.queue.clear_completed(), 3);

        // Nobody is due again before the delay, yet the markers go
        assert!(driver.due_check().await.unwrap().is_empty());
        assert_eq!(in_flight_len(&driver), 0);
    }

    #[tokio::test]
    async fn test_prune_keeps_pending_jobs() {
        // No processor registered: jobs stay queued
        let f = fixture(&["a"]).await;
        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());

        driver.due_check().await.unwrap();
        assert_eq!(driver.prune_in_flight(), 0);
        assert_eq!(in_flight_len(&driver), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waves_leaves_no_markers() {
        let f = fixture(&["a", "b", "c"]).await;
        f.queue.register_processor(Arc::new(Advancer {
            repo: f.repo.clone(),
        }));
        let driver = driver(
            &f,
            WaveConfig {
                size: 2,
                delay: Duration::from_secs(60),
                concurrency: 2,
            },
            DriverConfig::default(),
        );

        let report = driver.run_waves().await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(in_flight_len(&driver), 0);
    }

    #[tokio::test]
    async fn test_cleared_job_outcome_is_read_from_store() {
        let f = fixture(&["a", "b"]).await;
        f.queue.register_processor(Arc::new(Advancer {
            repo: f.repo.clone(),
        }));
        let driver = driver(&f, WaveConfig::default(), DriverConfig::default());

        let job = driver.enqueue_send(SendStep::from(
            &f.repo.find_by_contact("a").await.unwrap().unwrap(),
        ));
        f.queue.wait_idle().await;
        f.queue.clear_completed();

        assert!(f.queue.wait_for(&job).await.is_none());
        assert!(driver.advanced_past("a", 1).await);
        assert!(!driver.advanced_past("b", 1).await);
        assert!(!driver.advanced_past("ghost", 1).await);
    }
}
