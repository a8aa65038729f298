// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4 in production, injected via IdProvider)
pub type JobId = String;

/// Queue identifier (e.g. "email-sending", "crm-sync")
pub type QueueId = String;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Processing => write!(f, "PROCESSING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Job Entity
///
/// Owned by a `JobQueue` until it reaches a terminal state. Only the queue's
/// processing loop mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<P> {
    pub id: JobId,
    pub queue: QueueId,
    pub payload: P,
    pub state: JobState,

    // Retry bookkeeping: attempts started so far
    pub attempts: u32,
    pub max_attempts: u32,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl<P> Job<P> {
    /// Create a new job in `Queued` state
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Owning queue name
    /// * `payload` - Unit of work
    /// * `max_attempts` - Attempts allowed before the job fails
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        payload: P,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            payload,
            state: JobState::Queued,
            attempts: 0,
            max_attempts,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Transition Queued -> Processing, counting one attempt
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Queued {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Processing.to_string(),
            });
        }
        self.attempts += 1;
        self.state = JobState::Processing;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Transition Processing -> Completed
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::Processing {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Completed.to_string(),
            });
        }
        self.state = JobState::Completed;
        self.completed_at = Some(now_millis);
        Ok(())
    }

    /// Put the job back in `Queued` after a failed attempt
    pub fn requeue(&mut self, error: impl Into<String>) -> Result<()> {
        if self.state != JobState::Processing {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Queued.to_string(),
            });
        }
        self.state = JobState::Queued;
        self.started_at = None;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark the job `Failed` (terminal) after its last attempt
    pub fn fail(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        if self.state != JobState::Processing {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Failed.to_string(),
            });
        }
        self.state = JobState::Failed;
        self.completed_at = Some(now_millis);
        self.error = Some(error.into());
        Ok(())
    }
}
