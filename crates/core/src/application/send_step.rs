// Send Step Processor - drains the email queue into the transport

use crate::application::queue::{JobContext, JobProcessor, ProcessError};
use crate::application::rate_limiter::RateLimiter;
use crate::application::scheduler::SequenceScheduler;
use crate::domain::{SendStep, SequenceStatus};
use crate::port::EmailTransport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback pause when the limiter denies without a wait hint
const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SendStepConfig {
    /// Rate limiter key for this sender (e.g. the sending domain)
    pub sender_identity: String,
    /// Sleep out a denied window instead of failing the attempt
    pub wait_on_limit: bool,
}

impl Default for SendStepConfig {
    fn default() -> Self {
        Self {
            sender_identity: "default".to_string(),
            wait_on_limit: true,
        }
    }
}

/// Delivers one step, then advances the sequence
///
/// Re-reading the sequence first makes requeued and duplicate jobs harmless:
/// a job whose step is no longer current completes without sending.
pub struct SendStepProcessor {
    scheduler: Arc<SequenceScheduler>,
    transport: Arc<dyn EmailTransport>,
    rate_limiter: Arc<RateLimiter>,
    config: SendStepConfig,
}

impl SendStepProcessor {
    pub fn new(
        scheduler: Arc<SequenceScheduler>,
        transport: Arc<dyn EmailTransport>,
        rate_limiter: Arc<RateLimiter>,
        config: SendStepConfig,
    ) -> Self {
        Self {
            scheduler,
            transport,
            rate_limiter,
            config,
        }
    }

    async fn acquire_send_slot(&self) -> Result<(), ProcessError> {
        loop {
            let decision = self.rate_limiter.is_allowed(&self.config.sender_identity);
            if decision.allowed {
                return Ok(());
            }
            if !self.config.wait_on_limit {
                return Err(ProcessError::retryable(format!(
                    "rate limit reached for {}, retry in {}s",
                    self.config.sender_identity,
                    decision.wait_secs().unwrap_or(0)
                )));
            }
            let wait = decision
                .wait_time
                .filter(|d| !d.is_zero())
                .unwrap_or(RATE_LIMIT_FALLBACK_WAIT);
            info!(
                sender = %self.config.sender_identity,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit window"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl JobProcessor<SendStep> for SendStepProcessor {
    async fn process(&self, ctx: &JobContext<SendStep>) -> Result<(), ProcessError> {
        let send = &ctx.payload;

        let state = self
            .scheduler
            .get(&send.contact_id)
            .await?
            .ok_or_else(|| {
                ProcessError::permanent(format!("no sequence for contact {}", send.contact_id))
            })?;

        if state.status != SequenceStatus::Active || state.current_step != send.step {
            info!(
                contact_id = %send.contact_id,
                step = send.step,
                current_step = state.current_step,
                status = %state.status,
                "Skipping stale send"
            );
            return Ok(());
        }

        self.acquire_send_slot().await?;

        let receipt = self
            .transport
            .send(&send.email, &send.template_set, send.step)
            .await
            .map_err(|e| {
                warn!(
                    contact_id = %send.contact_id,
                    step = send.step,
                    attempt = ctx.attempt,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Send failed"
                );
                ProcessError::from(e)
            })?;

        info!(
            contact_id = %send.contact_id,
            step = send.step,
            message_id = %receipt.provider_message_id,
            "Email sent"
        );

        self.scheduler
            .record_send_success(&send.contact_id, send.step)
            .await?;
        Ok(())
    }

    async fn on_failed(&self, ctx: &JobContext<SendStep>, error: &ProcessError) {
        let contact_id = &ctx.payload.contact_id;
        if let Err(e) = self
            .scheduler
            .record_send_failure(contact_id, &error.message)
            .await
        {
            error!(contact_id = %contact_id, error = %e, "Failed to pause sequence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::{JobQueue, QueueConfig};
    use crate::application::rate_limiter::RateLimitConfig;
    use crate::application::scheduler::SequenceConfig;
    use crate::domain::{Contact, JobState, QualificationResult, LeadType, TemplateSet};
    use crate::port::email_transport::mocks::MockEmailTransport;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::sequence_repository::mocks::InMemorySequenceRepository;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use crate::port::DeliveryError;

    struct Fixture {
        scheduler: Arc<SequenceScheduler>,
        queue: JobQueue<SendStep>,
    }

    async fn fixture(transport: Arc<MockEmailTransport>, limit: u32, wait_on_limit: bool) -> Fixture {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let scheduler = Arc::new(SequenceScheduler::new(
            Arc::new(InMemorySequenceRepository::new()),
            clock.clone(),
            SequenceConfig::default(),
        ));
        let contact = Contact {
            id: "c1".to_string(),
            email: "c1@acme.com".to_string(),
            ..Contact::default()
        };
        let qualification = QualificationResult {
            lead_type: LeadType::B2b,
            template_set: TemplateSet::new(TemplateSet::B2B),
            score: 75,
            indicators: vec![],
            qualified: true,
            rejection: None,
        };
        scheduler.enroll(&contact, &qualification).await.unwrap();

        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig {
                limit,
                window: Duration::from_secs(100),
            },
            clock.clone(),
        ));
        let queue = JobQueue::new(
            QueueConfig::named("email-sending"),
            Arc::new(SequentialIdProvider::default()),
            clock,
        );
        queue.register_processor(Arc::new(SendStepProcessor::new(
            scheduler.clone(),
            transport,
            limiter,
            SendStepConfig {
                sender_identity: "acme.com".to_string(),
                wait_on_limit,
            },
        )));
        Fixture { scheduler, queue }
    }

    fn step(n: u32) -> SendStep {
        SendStep {
            contact_id: "c1".to_string(),
            email: "c1@acme.com".to_string(),
            template_set: TemplateSet::new(TemplateSet::B2B),
            step: n,
        }
    }

    #[tokio::test]
    async fn test_success_sends_and_advances() {
        let transport = Arc::new(MockEmailTransport::new_success());
        let f = fixture(transport.clone(), 100, true).await;

        let id = f.queue.add(step(1));
        let job = f.queue.wait_for(&id).await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(transport.sent()[0].to, "c1@acme.com");
        let state = f.scheduler.get("c1").await.unwrap().unwrap();
        assert_eq!((state.current_step, state.emails_sent), (2, 1));
    }

    #[tokio::test]
    async fn test_stale_job_completes_without_sending() {
        let transport = Arc::new(MockEmailTransport::new_success());
        let f = fixture(transport.clone(), 100, true).await;

        f.queue.add(step(1));
        let dup = f.queue.add(step(1));
        let job = f.queue.wait_for(&dup).await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_pause_sequence() {
        let transport = Arc::new(MockEmailTransport::new_fail(DeliveryError::Retryable(
            "timeout".to_string(),
        )));
        let f = fixture(transport.clone(), 100, true).await;

        let id = f.queue.add(step(1));
        let job = f.queue.wait_for(&id).await.unwrap();
        f.queue.wait_idle().await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(transport.call_count(), 3);
        let state = f.scheduler.get("c1").await.unwrap().unwrap();
        assert_eq!(state.status, SequenceStatus::Paused);
        assert!(state.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_permanent_error_pauses_after_one_attempt() {
        let transport = Arc::new(MockEmailTransport::new_fail(DeliveryError::classify(
            "550 mailbox not found",
        )));
        let f = fixture(transport.clone(), 100, true).await;

        let id = f.queue.add(step(1));
        let job = f.queue.wait_for(&id).await.unwrap();
        f.queue.wait_idle().await;

        assert_eq!(job.attempts, 1);
        assert_eq!(transport.call_count(), 1);
        let state = f.scheduler.get("c1").await.unwrap().unwrap();
        assert_eq!(state.status, SequenceStatus::Paused);
    }

    #[tokio::test]
    async fn test_rate_limited_attempt_is_retryable_without_wait() {
        let transport = Arc::new(MockEmailTransport::new_success());
        let f = fixture(transport.clone(), 0, false).await;

        let id = f.queue.add(step(1));
        let job = f.queue.wait_for(&id).await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.error.unwrap().contains("rate limit"));
        assert_eq!(transport.call_count(), 0);
    }
}
