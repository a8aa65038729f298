// Retry logic for queued jobs
use crate::application::queue::ProcessError;
use crate::domain::Job;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back at the tail of the queue
    Requeue,
    /// Do not retry, job has failed permanently
    Failed,
}

/// Requeue-based retry policy
///
/// Determines what happens to a job after a failed attempt based on:
/// - The error tag (permanent errors never retry)
/// - Attempts already spent vs. the job's max attempts
///
/// There is no explicit delay: a requeued job goes to the tail, so every
/// job queued ahead of it gets a turn first.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide the fate of `job` after the attempt that produced `error`
    ///
    /// `job.attempts` already includes the attempt that just failed.
    pub fn should_retry<P>(&self, job: &Job<P>, error: &ProcessError) -> RetryDecision {
        if !error.retryable {
            warn!(
                job_id = %job.id,
                error = %error,
                "Permanent failure, not retrying"
            );
            return RetryDecision::Failed;
        }

        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        info!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Requeueing job"
        );
        RetryDecision::Requeue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_attempts(attempts: u32) -> Job<()> {
        let mut job = Job::new("job-1", 0, "q", (), 3);
        job.attempts = attempts;
        job
    }

    #[test]
    fn test_retryable_error_requeues_until_max() {
        let policy = RetryPolicy::new();
        let err = ProcessError::retryable("timeout");

        assert_eq!(policy.should_retry(&job_with_attempts(1), &err), RetryDecision::Requeue);
        assert_eq!(policy.should_retry(&job_with_attempts(2), &err), RetryDecision::Requeue);
        assert_eq!(policy.should_retry(&job_with_attempts(3), &err), RetryDecision::Failed);
    }

    #[test]
    fn test_permanent_error_fails_immediately() {
        let policy = RetryPolicy::new();
        let err = ProcessError::permanent("invalid recipient");
        assert_eq!(policy.should_retry(&job_with_attempts(1), &err), RetryDecision::Failed);
    }
}
