// CRM Property Store Port

use crate::domain::{ContactId, SequenceProperties, TemplateSet};
use crate::error::Result;
use async_trait::async_trait;

/// CRM capability consumed by the scheduler and driver
#[async_trait]
pub trait CrmPropertyStore: Send + Sync {
    /// Contacts the CRM considers due for their next step
    ///
    /// # Arguments
    /// * `template_set` - Restrict to one template set (all when None)
    async fn contacts_due_for_step(&self, template_set: Option<&TemplateSet>)
        -> Result<Vec<ContactId>>;

    /// Mirror sequence progress onto the contact record
    async fn update_sequence_properties(
        &self,
        contact_id: &str,
        properties: SequenceProperties,
    ) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// In-memory CRM that records every property update
    #[derive(Default)]
    pub struct RecordingCrmStore {
        due: Mutex<Vec<(ContactId, TemplateSet)>>,
        updates: Mutex<Vec<(ContactId, SequenceProperties)>>,
        fail_updates: bool,
    }

    impl RecordingCrmStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store whose updates always fail (mirror failures must not break sends)
        pub fn failing() -> Self {
            Self {
                fail_updates: true,
                ..Self::default()
            }
        }

        pub fn set_due(&self, due: Vec<(ContactId, TemplateSet)>) {
            *self.due.lock().unwrap() = due;
        }

        pub fn updates(&self) -> Vec<(ContactId, SequenceProperties)> {
            self.updates.lock().unwrap().clone()
        }

        pub fn last_update(&self, contact_id: &str) -> Option<SequenceProperties> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(id, _)| id == contact_id)
                .map(|(_, props)| props.clone())
        }
    }

    #[async_trait]
    impl CrmPropertyStore for RecordingCrmStore {
        async fn contacts_due_for_step(
            &self,
            template_set: Option<&TemplateSet>,
        ) -> Result<Vec<ContactId>> {
            Ok(self
                .due
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, set)| template_set.map_or(true, |wanted| wanted == set))
                .map(|(id, _)| id.clone())
                .collect())
        }

        async fn update_sequence_properties(
            &self,
            contact_id: &str,
            properties: SequenceProperties,
        ) -> Result<()> {
            if self.fail_updates {
                return Err(crate::error::AppError::Internal(
                    "crm unavailable".to_string(),
                ));
            }
            self.updates
                .lock()
                .unwrap()
                .push((contact_id.to_string(), properties));
            Ok(())
        }
    }
}
