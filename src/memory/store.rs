use super::traits::{MemoryStore, OutcomeRecord, RejectionRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Volatile store for tests and dry runs. Same append-only semantics as the
/// sqlite backend, no durability.
#[derive(Default)]
pub struct InMemoryStore {
    outcomes: Mutex<Vec<OutcomeRecord>>,
    rejections: Mutex<Vec<RejectionRecord>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append_outcome(&self, record: OutcomeRecord) -> Result<(), StoreError> {
        self.outcomes
            .lock()
            .map_err(|e| StoreError::Append(format!("lock poisoned: {e}")))?
            .push(record);
        Ok(())
    }

    async fn append_rejection(&self, record: RejectionRecord) -> Result<(), StoreError> {
        self.rejections
            .lock()
            .map_err(|e| StoreError::Append(format!("lock poisoned: {e}")))?
            .push(record);
        Ok(())
    }

    async fn recent_outcomes(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let outcomes = self
            .outcomes
            .lock()
            .map_err(|e| StoreError::Query(format!("lock poisoned: {e}")))?;
        let mut matched: Vec<OutcomeRecord> = outcomes
            .iter()
            .filter(|r| r.persona_id == persona_id && r.recorded_at >= since)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn recent_rejections(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RejectionRecord>, StoreError> {
        let rejections = self
            .rejections
            .lock()
            .map_err(|e| StoreError::Query(format!("lock poisoned: {e}")))?;
        let mut matched: Vec<RejectionRecord> = rejections
            .iter()
            .filter(|r| r.persona_id == persona_id && r.recorded_at >= since)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matched.truncate(limit);
        Ok(matched)
    }
}
