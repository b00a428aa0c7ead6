use crate::engine::decision::TriggerFamily;
use crate::engine::scheduler::CommandStatus;
use crate::error::StoreError;
use crate::platform::{ActionKind, ActionTarget};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal record of an executed (or expired/failed) command. One row per
/// command, written exactly once at the terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub command_id: String,
    pub persona_id: String,
    pub kind: ActionKind,
    pub trigger: TriggerFamily,
    pub target: ActionTarget,
    pub status: CommandStatus,
    pub attempts: u32,
    pub platform_id: Option<String>,
    pub error: Option<String>,
    pub latency_ms: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.status, CommandStatus::Succeeded)
    }
}

/// A decision the scheduler refused (capacity, replan cancellation), with the
/// reason surfaced to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub persona_id: String,
    pub kind: ActionKind,
    pub idempotency_key: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only log of action outcomes and scheduler rejections, plus the
/// bounded-recency read path that feeds the state tracker. Durable schema is
/// the backing store's concern; this core only needs append + recent-query.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append_outcome(&self, record: OutcomeRecord) -> Result<(), StoreError>;

    async fn append_rejection(&self, record: RejectionRecord) -> Result<(), StoreError>;

    /// Outcomes for a persona since `since`, newest first, bounded by `limit`.
    async fn recent_outcomes(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, StoreError>;

    async fn recent_rejections(
        &self,
        persona_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RejectionRecord>, StoreError>;
}
