// Email Transport Port
// Abstraction over the outbound mail provider (Apps Script, Gmail, ...)

use crate::domain::TemplateSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Successful hand-off to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

/// Delivery errors, tagged by whether another attempt can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Rate limit hit, timeout, provider hiccup
    #[error("Retryable delivery error: {0}")]
    Retryable(String),

    /// Invalid address, missing template, rejected request
    #[error("Permanent delivery error: {0}")]
    Permanent(String),
}

// Hard bounces: the address or request will never succeed
const PERMANENT_PATTERNS: &[&str] = &[
    "user not found",
    "mailbox not found",
    "invalid recipient",
    "address not found",
    "does not exist",
    "no such user",
    "template not found",
];

// SMTP reply codes, matched as whole tokens only
const PERMANENT_CODES: &[&str] = &["550", "551", "553"];
const RETRYABLE_CODES: &[&str] = &["421", "450", "451", "452"];

// Soft and transient bounces
const RETRYABLE_PATTERNS: &[&str] = &[
    "mailbox full",
    "quota exceeded",
    "temporarily unavailable",
    "try again later",
    "timeout",
    "connection refused",
    "temporary failure",
    "rate limit",
];

impl DeliveryError {
    /// Tag a provider error message
    ///
    /// Permanent patterns are checked first; anything unrecognised is
    /// treated as retryable.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p))
            || PERMANENT_CODES.iter().any(|c| contains_code(&lower, c))
        {
            return DeliveryError::Permanent(message);
        }
        if RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
            || RETRYABLE_CODES.iter().any(|c| contains_code(&lower, c))
        {
            return DeliveryError::Retryable(message);
        }
        DeliveryError::Retryable(message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            DeliveryError::Retryable(m) | DeliveryError::Permanent(m) => m,
        }
    }
}

/// `code` appears with no letter or digit directly on either side
fn contains_code(text: &str, code: &str) -> bool {
    text.match_indices(code).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Email transport trait
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send step `step` of `template_set` to `to`
    ///
    /// # Errors
    /// - DeliveryError::Retryable for transient failures
    /// - DeliveryError::Permanent when retrying cannot help
    async fn send(
        &self,
        to: &str,
        template_set: &TemplateSet,
        step: u32,
    ) -> Result<SendReceipt, DeliveryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock transport behavior once the script runs out
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with this error
        Fail(DeliveryError),
    }

    /// A send observed by the mock
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub to: String,
        pub template_set: String,
        pub step: u32,
    }

    /// Mock Email Transport for testing
    ///
    /// Scripted outcomes are consumed first (one per call), then the
    /// default behavior applies.
    pub struct MockEmailTransport {
        script: Mutex<VecDeque<Result<(), DeliveryError>>>,
        default: MockBehavior,
        sent: Mutex<Vec<SentEmail>>,
        call_count: Mutex<usize>,
    }

    impl MockEmailTransport {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default,
                sent: Mutex::new(Vec::new()),
                call_count: Mutex::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(error: DeliveryError) -> Self {
            Self::new(MockBehavior::Fail(error))
        }

        /// Fail the next `n` calls with `error`, then fall back to default
        pub fn fail_next(self, n: usize, error: DeliveryError) -> Self {
            {
                let mut script = self.script.lock().unwrap();
                for _ in 0..n {
                    script.push_back(Err(error.clone()));
                }
            }
            self
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }

        /// Successful sends, in order
        pub fn sent(&self) -> Vec<SentEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailTransport for MockEmailTransport {
        async fn send(
            &self,
            to: &str,
            template_set: &TemplateSet,
            step: u32,
        ) -> Result<SendReceipt, DeliveryError> {
            let call = {
                let mut count = self.call_count.lock().unwrap();
                *count += 1;
                *count
            };

            let scripted = self.script.lock().unwrap().pop_front();
            let outcome = match scripted {
                Some(outcome) => outcome,
                None => match &self.default {
                    MockBehavior::Success => Ok(()),
                    MockBehavior::Fail(e) => Err(e.clone()),
                },
            };

            outcome.map(|()| {
                self.sent.lock().unwrap().push(SentEmail {
                    to: to.to_string(),
                    template_set: template_set.to_string(),
                    step,
                });
                SendReceipt {
                    provider_message_id: format!("mock-{}", call),
                }
            })
        }
    }
}
