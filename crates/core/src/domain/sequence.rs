// Sequence Domain Model
//
// State machine per contact:
//   Active(current_step, next_send_at) --success, last step--> Completed
//   Active --retries exhausted / manual pause--> Paused
//   Paused --manual resume--> Active
//   any non-terminal --manual complete--> Completed

use crate::domain::contact::ContactId;
use crate::domain::error::{DomainError, Result};
use crate::domain::qualification::{LeadType, TemplateSet};
use serde::{Deserialize, Serialize};

/// Sequence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceStatus {
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceStatus::Active => write!(f, "ACTIVE"),
            SequenceStatus::Paused => write!(f, "PAUSED"),
            SequenceStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl std::str::FromStr for SequenceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SequenceStatus::Active),
            "PAUSED" => Ok(SequenceStatus::Paused),
            "COMPLETED" => Ok(SequenceStatus::Completed),
            other => Err(DomainError::ValidationError(format!(
                "unknown sequence status: {}",
                other
            ))),
        }
    }
}

/// Per-contact position in an email cadence
///
/// Only the SequenceScheduler writes `current_step` and `next_send_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub contact_id: ContactId,
    pub email: String,
    pub lead_type: LeadType,
    pub template_set: TemplateSet,
    pub current_step: u32,
    pub total_steps: u32,
    pub next_send_at: i64, // epoch ms
    pub emails_sent: u32,
    pub status: SequenceStatus,
    pub last_error: Option<String>,
    pub enrolled_at: i64,
    pub updated_at: i64,
}

impl SequenceState {
    /// Enroll a contact at step 1, due immediately
    pub fn enroll(
        contact_id: impl Into<String>,
        email: impl Into<String>,
        lead_type: LeadType,
        template_set: TemplateSet,
        now_millis: i64,
    ) -> Self {
        let total_steps = template_set.step_count();
        Self {
            contact_id: contact_id.into(),
            email: email.into(),
            lead_type,
            template_set,
            current_step: 1,
            total_steps,
            next_send_at: now_millis,
            emails_sent: 0,
            status: SequenceStatus::Active,
            last_error: None,
            enrolled_at: now_millis,
            updated_at: now_millis,
        }
    }

    /// Active and `next_send_at` has elapsed
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.status == SequenceStatus::Active && self.next_send_at <= now_millis
    }

    /// Record a successful send of `step`
    ///
    /// Returns `Ok(false)` without touching state when `step` is not the
    /// current step (a duplicate or stale job).
    pub fn advance(&mut self, step: u32, now_millis: i64, delay_millis: i64) -> Result<bool> {
        if self.status != SequenceStatus::Active {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: format!("step {}", step + 1),
            });
        }
        if step != self.current_step {
            return Ok(false);
        }

        self.current_step += 1;
        self.emails_sent += 1;
        self.next_send_at = now_millis + delay_millis;
        self.updated_at = now_millis;

        if self.current_step > self.total_steps {
            self.status = SequenceStatus::Completed;
        }
        Ok(true)
    }

    /// Halt the sequence until external remediation
    pub fn pause(&mut self, reason: impl Into<String>, now_millis: i64) -> Result<()> {
        if self.status == SequenceStatus::Completed {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: SequenceStatus::Paused.to_string(),
            });
        }
        self.status = SequenceStatus::Paused;
        self.last_error = Some(reason.into());
        self.updated_at = now_millis;
        Ok(())
    }

    /// Paused -> Active, due immediately
    pub fn resume(&mut self, now_millis: i64) -> Result<()> {
        if self.status != SequenceStatus::Paused {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: SequenceStatus::Active.to_string(),
            });
        }
        self.status = SequenceStatus::Active;
        self.next_send_at = now_millis;
        self.last_error = None;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Stop the sequence for good
    pub fn complete(&mut self, now_millis: i64) {
        self.status = SequenceStatus::Completed;
        self.updated_at = now_millis;
    }

    /// Properties mirrored to the CRM after every change
    pub fn properties(&self) -> SequenceProperties {
        SequenceProperties {
            step: self.current_step,
            next_send_at: self.next_send_at,
            emails_sent: self.emails_sent,
            status: self.status,
            template_set: self.template_set.clone(),
        }
    }
}

/// CRM-mirrored subset of SequenceState
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceProperties {
    pub template_set: TemplateSet,
    pub step: u32,
    pub next_send_at: i64,
    pub emails_sent: u32,
    pub status: SequenceStatus,
}

/// Payload of a "send step N" job on the email queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStep {
    pub contact_id: ContactId,
    pub email: String,
    pub template_set: TemplateSet,
    pub step: u32,
}

impl From<&SequenceState> for SendStep {
    fn from(state: &SequenceState) -> Self {
        Self {
            contact_id: state.contact_id.clone(),
            email: state.email.clone(),
            template_set: state.template_set.clone(),
            step: state.current_step,
        }
    }
}
