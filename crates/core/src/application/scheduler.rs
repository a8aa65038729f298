//! Sequence Scheduler - owns every SequenceState transition
//!
//! - enroll: first qualification creates an Active sequence at step 1, due now
//! - record_send_success: advance one step on the template set's cadence
//! - record_send_failure: retries exhausted, pause until remediation
//! - pause / resume / complete: external remediation
//!
//! Every change is persisted through the SequenceRepository and mirrored to
//! the CRM (best effort).

use crate::domain::{Contact, QualificationResult, SequenceState, TemplateSet};
use crate::error::{AppError, Result};
use crate::port::{CrmPropertyStore, SequenceRepository, TimeProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_DELAY_HOURS: u64 = 24;

/// Cadence configuration
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Delay between steps when a template set has no override
    pub default_delay_hours: u64,
    /// Per template set overrides, keyed by set name
    pub delay_hours: HashMap<String, u64>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            default_delay_hours: DEFAULT_DELAY_HOURS,
            delay_hours: HashMap::new(),
        }
    }
}

impl SequenceConfig {
    /// Delay after a successful send for this template set
    pub fn delay_for(&self, template_set: &TemplateSet) -> Duration {
        let hours = self
            .delay_hours
            .get(template_set.as_str())
            .copied()
            .unwrap_or(self.default_delay_hours);
        Duration::from_secs(hours * 3600)
    }
}

/// Sole writer of `current_step` and `next_send_at`
pub struct SequenceScheduler {
    repository: Arc<dyn SequenceRepository>,
    crm: Option<Arc<dyn CrmPropertyStore>>,
    time_provider: Arc<dyn TimeProvider>,
    config: SequenceConfig,
}

impl SequenceScheduler {
    pub fn new(
        repository: Arc<dyn SequenceRepository>,
        time_provider: Arc<dyn TimeProvider>,
        config: SequenceConfig,
    ) -> Self {
        Self {
            repository,
            crm: None,
            time_provider,
            config,
        }
    }

    /// Mirror state changes to a CRM
    pub fn with_crm(mut self, crm: Arc<dyn CrmPropertyStore>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub async fn get(&self, contact_id: &str) -> Result<Option<SequenceState>> {
        self.repository.find_by_contact(contact_id).await
    }

    async fn load(&self, contact_id: &str) -> Result<SequenceState> {
        self.repository
            .find_by_contact(contact_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No sequence for contact {}", contact_id)))
    }

    async fn save(&self, state: &SequenceState) -> Result<()> {
        self.repository.update(state).await?;
        self.mirror(state).await;
        Ok(())
    }

    /// Push the CRM-visible properties; failures never roll back local state
    async fn mirror(&self, state: &SequenceState) {
        let Some(crm) = &self.crm else {
            return;
        };
        if let Err(e) = crm
            .update_sequence_properties(&state.contact_id, state.properties())
            .await
        {
            warn!(
                contact_id = %state.contact_id,
                error = %e,
                "Failed to mirror sequence to CRM"
            );
        }
    }

    /// Create an Active sequence for a qualified contact
    ///
    /// An already enrolled contact gets its existing state back unchanged,
    /// whatever its status.
    ///
    /// # Errors
    /// `AppError::Validation` if the contact was not qualified.
    pub async fn enroll(
        &self,
        contact: &Contact,
        qualification: &QualificationResult,
    ) -> Result<SequenceState> {
        if !qualification.qualified {
            return Err(AppError::Validation(format!(
                "Contact {} not qualified: {}",
                contact.id,
                qualification.rejection.as_deref().unwrap_or("rejected")
            )));
        }

        if let Some(existing) = self.repository.find_by_contact(&contact.id).await? {
            debug!(
                contact_id = %contact.id,
                status = %existing.status,
                "Contact already enrolled"
            );
            return Ok(existing);
        }

        let now = self.time_provider.now_millis();
        let state = SequenceState::enroll(
            contact.id.clone(),
            contact.email.clone(),
            qualification.lead_type,
            qualification.template_set.clone(),
            now,
        );
        self.repository.insert(&state).await?;
        self.mirror(&state).await;

        info!(
            contact_id = %state.contact_id,
            template_set = %state.template_set,
            total_steps = state.total_steps,
            "Contact enrolled"
        );
        Ok(state)
    }

    /// Advance after step `step` was delivered
    ///
    /// A success for a step that is no longer current is a stale or
    /// duplicate job: logged and ignored.
    pub async fn record_send_success(&self, contact_id: &str, step: u32) -> Result<SequenceState> {
        let mut state = self.load(contact_id).await?;
        let now = self.time_provider.now_millis();
        let delay = self.config.delay_for(&state.template_set).as_millis() as i64;

        if !state.advance(step, now, delay)? {
            warn!(
                contact_id = %contact_id,
                step = step,
                current_step = state.current_step,
                "Ignoring stale send success"
            );
            return Ok(state);
        }
        self.save(&state).await?;

        info!(
            contact_id = %contact_id,
            step = step,
            status = %state.status,
            next_send_at = state.next_send_at,
            emails_sent = state.emails_sent,
            "Sequence advanced"
        );
        Ok(state)
    }

    /// Retries exhausted: pause with the error recorded
    pub async fn record_send_failure(&self, contact_id: &str, error: &str) -> Result<SequenceState> {
        warn!(contact_id = %contact_id, error = %error, "Send failed permanently, pausing sequence");
        self.pause(contact_id, error).await
    }

    pub async fn pause(&self, contact_id: &str, reason: &str) -> Result<SequenceState> {
        let mut state = self.load(contact_id).await?;
        state.pause(reason, self.time_provider.now_millis())?;
        self.save(&state).await?;
        info!(contact_id = %contact_id, reason = %reason, "Sequence paused");
        Ok(state)
    }

    /// Paused -> Active, due immediately
    pub async fn resume(&self, contact_id: &str) -> Result<SequenceState> {
        let mut state = self.load(contact_id).await?;
        state.resume(self.time_provider.now_millis())?;
        self.save(&state).await?;
        info!(contact_id = %contact_id, step = state.current_step, "Sequence resumed");
        Ok(state)
    }

    /// Manual stop (terminal)
    pub async fn complete(&self, contact_id: &str) -> Result<SequenceState> {
        let mut state = self.load(contact_id).await?;
        state.complete(self.time_provider.now_millis());
        self.save(&state).await?;
        info!(contact_id = %contact_id, "Sequence completed manually");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::qualification::{QualificationConfig, QualificationEngine};
    use crate::domain::SequenceStatus;
    use crate::port::crm_store::mocks::RecordingCrmStore;
    use crate::port::sequence_repository::mocks::InMemorySequenceRepository;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    const HOUR_MS: i64 = 3600 * 1000;

    struct Fixture {
        clock: Arc<ManualTimeProvider>,
        crm: Arc<RecordingCrmStore>,
        scheduler: SequenceScheduler,
    }

    fn fixture(crm: RecordingCrmStore) -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let crm = Arc::new(crm);
        let scheduler = SequenceScheduler::new(
            Arc::new(InMemorySequenceRepository::new()),
            clock.clone(),
            SequenceConfig::default(),
        )
        .with_crm(crm.clone());
        Fixture {
            clock,
            crm,
            scheduler,
        }
    }

    fn b2b_contact(id: &str) -> (Contact, QualificationResult) {
        let contact = Contact {
            id: id.to_string(),
            company: "acme corp".to_string(),
            email: format!("{}@acme.com", id),
            ..Contact::default()
        };
        let result = QualificationEngine::default().qualify(&contact);
        (contact, result)
    }

    #[tokio::test]
    async fn test_five_successes_complete_with_24h_cadence() {
        let f = fixture(RecordingCrmStore::new());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();

        let mut last_next = 0;
        for step in 1..=5 {
            let state = f.scheduler.record_send_success("c1", step).await.unwrap();
            assert_eq!(state.next_send_at, last_next + 24 * HOUR_MS);
            assert_eq!(state.emails_sent, step);
            last_next = state.next_send_at;
            f.clock.set(state.next_send_at);

            let expected = if step == 5 {
                SequenceStatus::Completed
            } else {
                SequenceStatus::Active
            };
            assert_eq!(state.status, expected);
        }

        let mirrored = f.crm.last_update("c1").unwrap();
        assert_eq!(mirrored.status, SequenceStatus::Completed);
        assert_eq!(mirrored.emails_sent, 5);
        assert_eq!(mirrored.template_set.as_str(), TemplateSet::B2B);
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let f = fixture(RecordingCrmStore::new());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();
        f.scheduler.record_send_success("c1", 1).await.unwrap();

        let again = f.scheduler.enroll(&contact, &q).await.unwrap();
        assert_eq!(again.current_step, 2);
    }

    #[tokio::test]
    async fn test_enroll_rejects_unqualified_contact() {
        let f = fixture(RecordingCrmStore::new());
        let contact = Contact {
            id: "c1".to_string(),
            ..Contact::default()
        };
        let q = QualificationEngine::new(QualificationConfig {
            reject_on_missing_email: true,
        })
        .qualify(&contact);

        let err = f.scheduler.enroll(&contact, &q).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_success_is_noop() {
        let f = fixture(RecordingCrmStore::new());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();

        f.scheduler.record_send_success("c1", 1).await.unwrap();
        let state = f.scheduler.record_send_success("c1", 1).await.unwrap();
        assert_eq!(state.current_step, 2);
        assert_eq!(state.emails_sent, 1);
    }

    #[tokio::test]
    async fn test_failure_pauses_and_resume_reactivates() {
        let f = fixture(RecordingCrmStore::new());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();

        let paused = f
            .scheduler
            .record_send_failure("c1", "mailbox not found")
            .await
            .unwrap();
        assert_eq!(paused.status, SequenceStatus::Paused);
        assert_eq!(paused.last_error.as_deref(), Some("mailbox not found"));

        // A paused sequence cannot advance
        assert!(f.scheduler.record_send_success("c1", 1).await.is_err());

        f.clock.set(5 * HOUR_MS);
        let resumed = f.scheduler.resume("c1").await.unwrap();
        assert_eq!(resumed.status, SequenceStatus::Active);
        assert_eq!(resumed.next_send_at, 5 * HOUR_MS);
        assert!(resumed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_complete_is_terminal() {
        let f = fixture(RecordingCrmStore::new());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();

        f.scheduler.complete("c1").await.unwrap();
        assert!(f.scheduler.pause("c1", "late").await.is_err());
        assert!(f.scheduler.resume("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_crm_failure_does_not_block_progress() {
        let f = fixture(RecordingCrmStore::failing());
        let (contact, q) = b2b_contact("c1");
        f.scheduler.enroll(&contact, &q).await.unwrap();

        let state = f.scheduler.record_send_success("c1", 1).await.unwrap();
        assert_eq!(state.current_step, 2);
        assert!(f.crm.updates().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_contact_is_not_found() {
        let f = fixture(RecordingCrmStore::new());
        let err = f.scheduler.record_send_success("ghost", 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_per_set_delay_override() {
        let mut config = SequenceConfig::default();
        config.delay_hours.insert(TemplateSet::STUDENT.to_string(), 48);

        assert_eq!(
            config.delay_for(&TemplateSet::new(TemplateSet::STUDENT)),
            Duration::from_secs(48 * 3600)
        );
        assert_eq!(
            config.delay_for(&TemplateSet::new(TemplateSet::B2B)),
            Duration::from_secs(24 * 3600)
        );
    }
}
