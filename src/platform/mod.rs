//! Platform boundary: the closed set of action kinds the engine can take, the
//! typed command variants handed to the external executor, and the trait seams
//! for the platform client and the content generator.

pub use crate::error::PlatformError;

use crate::persona::PersonaProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Closed set of platform actions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Post,
    Reply,
    Retweet,
    Like,
    Follow,
}

impl ActionKind {
    /// Kinds whose dispatch requires generated text.
    #[must_use]
    pub const fn bears_content(self) -> bool {
        matches!(self, Self::Post | Self::Reply)
    }
}

/// What a decision acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    None,
    Tweet(String),
    User(String),
}

impl ActionTarget {
    /// Inverse of the `Display` form, for rows read back from the store.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(id) = raw.strip_prefix("tweet:") {
            Self::Tweet(id.to_string())
        } else if let Some(id) = raw.strip_prefix("user:") {
            Self::User(id.to_string())
        } else {
            Self::None
        }
    }
}

impl std::fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tweet(id) => write!(f, "tweet:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Fully materialized command for the platform executor. Built by the
/// dispatcher from a decision plus any generated content, just before the
/// network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformCommand {
    Post { text: String },
    Reply { tweet_id: String, text: String },
    Retweet { tweet_id: String },
    Like { tweet_id: String },
    Follow { user_id: String },
}

impl PlatformCommand {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Post { .. } => ActionKind::Post,
            Self::Reply { .. } => ActionKind::Reply,
            Self::Retweet { .. } => ActionKind::Retweet,
            Self::Like { .. } => ActionKind::Like,
            Self::Follow { .. } => ActionKind::Follow,
        }
    }
}

/// What the platform hands back on success.
#[derive(Debug, Clone, Default)]
pub struct PlatformReceipt {
    /// Platform-assigned identifier of the created object, when one exists
    /// (a new tweet id for posts and replies).
    pub platform_id: Option<String>,
}


/// Inputs the content generator needs to produce text for a content-bearing
/// command.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub kind: ActionKind,
    pub target: ActionTarget,
    /// Trend topic for proactive posts, when one drove the decision.
    pub topic: Option<String>,
    /// Original text being replied to, when known.
    pub in_reply_to_text: Option<String>,
}

/// External platform client. Must report exactly one of success, recoverable
/// error, or permanent error, and must dedupe on the engine's idempotency key
/// if the same key is retried.
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &PlatformCommand,
        idempotency_key: &str,
    ) -> Result<PlatformReceipt, PlatformError>;
}

/// Opaque, possibly-failing text generation dependency. Called by the
/// dispatcher just before platform execution for content-bearing kinds;
/// failures are treated as transient.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        profile: &PersonaProfile,
        request: &ContentRequest,
    ) -> anyhow::Result<String>;
}

// ─── Local collaborators for dry runs and tests ─────────────────────────────

/// Executor that performs no network calls: logs the command and fabricates a
/// platform id. Default wiring for `magpie tick` and offline runs.
#[derive(Default)]
pub struct DryRunExecutor {
    counter: AtomicU64,
}

#[async_trait]
impl PlatformExecutor for DryRunExecutor {
    async fn execute(
        &self,
        command: &PlatformCommand,
        idempotency_key: &str,
    ) -> Result<PlatformReceipt, PlatformError> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        tracing::info!(kind = %command.kind(), key = idempotency_key, "dry-run dispatch");
        Ok(PlatformReceipt {
            platform_id: Some(format!("dry-{seq}")),
        })
    }
}

/// Deterministic template-based generator used when no model integration is
/// wired in. Real deployments inject their own [`ContentGenerator`].
pub struct TemplateContentGenerator;

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    async fn generate(
        &self,
        profile: &PersonaProfile,
        request: &ContentRequest,
    ) -> anyhow::Result<String> {
        let text = match request.kind {
            ActionKind::Reply => format!("{} replying to {}", profile.name, request.target),
            _ => match &request.topic {
                Some(topic) => format!("{} on {topic}", profile.name),
                None => format!("{} checking in", profile.name),
            },
        };
        Ok(text)
    }
}
