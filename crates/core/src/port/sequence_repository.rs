// Sequence Repository Port (Interface)

use crate::domain::{SequenceState, SequenceStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Durable store mirroring SequenceState per contact
#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Insert a new sequence (fails if the contact is already enrolled)
    async fn insert(&self, state: &SequenceState) -> Result<()>;

    /// Find sequence by contact ID
    async fn find_by_contact(&self, contact_id: &str) -> Result<Option<SequenceState>>;

    /// Update sequence (fails if missing)
    async fn update(&self, state: &SequenceState) -> Result<()>;

    /// Active sequences with `next_send_at <= now`, oldest first
    async fn find_due(&self, now_millis: i64, limit: usize) -> Result<Vec<SequenceState>>;

    /// Sequences in a given status
    async fn find_by_status(&self, status: SequenceStatus, limit: usize)
        -> Result<Vec<SequenceState>>;

    /// Count sequences by status
    async fn count_by_status(&self, status: SequenceStatus) -> Result<i64>;

    /// All sequences, most recently enrolled first
    async fn list(&self, limit: usize) -> Result<Vec<SequenceState>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory SequenceRepository
    #[derive(Default)]
    pub struct InMemorySequenceRepository {
        states: Mutex<HashMap<String, SequenceState>>,
    }

    impl InMemorySequenceRepository {
        pub fn new() -> Self {
            Self::default()
        }

        fn sorted(mut states: Vec<SequenceState>) -> Vec<SequenceState> {
            states.sort_by(|a, b| {
                a.next_send_at
                    .cmp(&b.next_send_at)
                    .then_with(|| a.contact_id.cmp(&b.contact_id))
            });
            states
        }
    }

    #[async_trait]
    impl SequenceRepository for InMemorySequenceRepository {
        async fn insert(&self, state: &SequenceState) -> Result<()> {
            let mut states = self.states.lock().unwrap();
            if states.contains_key(&state.contact_id) {
                return Err(AppError::InvalidState(format!(
                    "Contact {} already enrolled",
                    state.contact_id
                )));
            }
            states.insert(state.contact_id.clone(), state.clone());
            Ok(())
        }

        async fn find_by_contact(&self, contact_id: &str) -> Result<Option<SequenceState>> {
            Ok(self.states.lock().unwrap().get(contact_id).cloned())
        }

        async fn update(&self, state: &SequenceState) -> Result<()> {
            let mut states = self.states.lock().unwrap();
            match states.get_mut(&state.contact_id) {
                Some(existing) => {
                    *existing = state.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!(
                    "Sequence for contact {} not found",
                    state.contact_id
                ))),
            }
        }

        async fn find_due(&self, now_millis: i64, limit: usize) -> Result<Vec<SequenceState>> {
            let due = self
                .states
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.is_due(now_millis))
                .cloned()
                .collect();
            Ok(Self::sorted(due).into_iter().take(limit).collect())
        }

        async fn find_by_status(
            &self,
            status: SequenceStatus,
            limit: usize,
        ) -> Result<Vec<SequenceState>> {
            let matching = self
                .states
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == status)
                .cloned()
                .collect();
            Ok(Self::sorted(matching).into_iter().take(limit).collect())
        }

        async fn count_by_status(&self, status: SequenceStatus) -> Result<i64> {
            Ok(self
                .states
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == status)
                .count() as i64)
        }

        async fn list(&self, limit: usize) -> Result<Vec<SequenceState>> {
            let mut all: Vec<SequenceState> =
                self.states.lock().unwrap().values().cloned().collect();
            all.sort_by(|a, b| {
                b.enrolled_at
                    .cmp(&a.enrolled_at)
                    .then_with(|| a.contact_id.cmp(&b.contact_id))
            });
            all.truncate(limit);
            Ok(all)
        }
    }
}
