//! Delivery failures: retries, pausing and remediation

mod common;

use common::{b2b_contact, pipeline, HOUR_MS};
use outreach_core::domain::{JobState, SendStep, SequenceStatus};
use outreach_core::port::email_transport::mocks::MockEmailTransport;
use outreach_core::port::DeliveryError;

#[tokio::test]
async fn test_transient_failures_recover_within_attempts() {
    let transport = MockEmailTransport::new_success()
        .fail_next(2, DeliveryError::classify("421 try again later"));
    let p = pipeline(transport).await;
    let state = p.enroll(&b2b_contact("c1")).await;

    let job_id = p.driver.enqueue_send(SendStep::from(&state));
    let job = p.driver.queue().wait_for(&job_id).await.unwrap();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(p.transport.call_count(), 3);

    let state = p.state("c1").await;
    assert_eq!(state.status, SequenceStatus::Active);
    assert_eq!(state.current_step, 2);
    assert_eq!(state.emails_sent, 1);
}

#[tokio::test]
async fn test_exhausted_retries_pause_until_resumed() {
    let p = pipeline(MockEmailTransport::new_fail(DeliveryError::Retryable(
        "mailbox full".to_string(),
    )))
    .await;
    p.enroll(&b2b_contact("c1")).await;

    assert_eq!(p.tick().await, 1);
    assert_eq!(p.transport.call_count(), 3);

    let state = p.state("c1").await;
    assert_eq!(state.status, SequenceStatus::Paused);
    assert_eq!(state.current_step, 1);
    assert_eq!(state.emails_sent, 0);
    assert!(state.last_error.unwrap().contains("mailbox full"));
    assert_eq!(p.driver.queue().get_status().failed, 1);

    // Paused sequences are never picked up again on their own
    p.clock.set(72 * HOUR_MS);
    assert_eq!(p.tick().await, 0);
    assert_eq!(p.transport.call_count(), 3);

    let resumed = p.scheduler.resume("c1").await.unwrap();
    assert_eq!(resumed.status, SequenceStatus::Active);
    assert_eq!(resumed.next_send_at, 72 * HOUR_MS);
    assert!(resumed.last_error.is_none());
    assert_eq!(p.tick().await, 1);
}

#[tokio::test]
async fn test_permanent_failure_pauses_after_one_attempt() {
    let p = pipeline(MockEmailTransport::new_fail(DeliveryError::classify(
        "550 5.1.1 user not found",
    )))
    .await;
    let state = p.enroll(&b2b_contact("c1")).await;

    let job_id = p.driver.enqueue_send(SendStep::from(&state));
    let job = p.driver.queue().wait_for(&job_id).await.unwrap();

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(p.transport.call_count(), 1);

    // The on_failed hook has run by the time the job reads as failed
    let state = p.state("c1").await;
    assert_eq!(state.status, SequenceStatus::Paused);

    let mirrored = p.crm.last_update("c1").unwrap();
    assert_eq!(mirrored.status, SequenceStatus::Paused);
}

#[tokio::test]
async fn test_one_failing_contact_does_not_block_others() {
    let transport = MockEmailTransport::new_success()
        .fail_next(1, DeliveryError::classify("invalid recipient"));
    let p = pipeline(transport).await;
    p.enroll(&b2b_contact("a")).await;
    p.clock.set(1);
    p.enroll(&b2b_contact("b")).await;
    p.clock.set(2);

    assert_eq!(p.tick().await, 2);

    // Due order is oldest first, so "a" takes the scripted failure
    assert_eq!(p.state("a").await.status, SequenceStatus::Paused);
    let b = p.state("b").await;
    assert_eq!(b.status, SequenceStatus::Active);
    assert_eq!(b.current_step, 2);
}

#[tokio::test]
async fn test_manual_complete_stops_sequence() {
    let p = pipeline(MockEmailTransport::new_success()).await;
    p.enroll(&b2b_contact("c1")).await;
    assert_eq!(p.tick().await, 1);

    let state = p.scheduler.complete("c1").await.unwrap();
    assert_eq!(state.status, SequenceStatus::Completed);

    p.clock.set(48 * HOUR_MS);
    assert_eq!(p.tick().await, 0);
    assert!(p.scheduler.resume("c1").await.is_err());
}
