// Job Processor contract

use async_trait::async_trait;
use thiserror::Error;

/// What a processor sees for one attempt
#[derive(Debug, Clone)]
pub struct JobContext<P> {
    pub job_id: String,
    pub queue: String,
    pub payload: P,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Processor failure, tagged for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProcessError {
    pub message: String,
    pub retryable: bool,
}

impl ProcessError {
    /// Another attempt may succeed (requeue)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Another attempt cannot succeed (fail now)
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<crate::port::DeliveryError> for ProcessError {
    fn from(err: crate::port::DeliveryError) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<crate::error::AppError> for ProcessError {
    fn from(err: crate::error::AppError) -> Self {
        // Storage and collaborator hiccups are worth another attempt
        Self::retryable(err.to_string())
    }
}

/// Handler registered on a JobQueue
///
/// Processors must be idempotent: a requeued job may run again after a
/// partial side effect from an earlier attempt.
#[async_trait]
pub trait JobProcessor<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    /// Process one attempt of a job
    async fn process(&self, ctx: &JobContext<P>) -> Result<(), ProcessError>;

    /// Called once when the job transitions to Failed
    async fn on_failed(&self, _ctx: &JobContext<P>, _error: &ProcessError) {}
}
