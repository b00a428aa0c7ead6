use crate::persona::PersonaProfile;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashSet;
use std::sync::Mutex;

/// Inbound platform events the persona may react to. Closed set; the decision
/// maker matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Mention {
        id: String,
        tweet_id: String,
        author: String,
        text: String,
        received_at: DateTime<Utc>,
    },
    Reply {
        id: String,
        tweet_id: String,
        author: String,
        text: String,
        received_at: DateTime<Utc>,
    },
}

impl InboundEvent {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Mention { id, .. } | Self::Reply { id, .. } => id,
        }
    }

    #[must_use]
    pub fn tweet_id(&self) -> &str {
        match self {
            Self::Mention { tweet_id, .. } | Self::Reply { tweet_id, .. } => tweet_id,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Mention { text, .. } | Self::Reply { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSignal {
    pub topic: String,
    /// Normalized 0..1 momentum of the trend.
    pub velocity: f64,
}

/// Trend cache read. `Unknown` means the upstream source was unavailable this
/// cycle; downstream logic branches on it explicitly instead of guessing.
#[derive(Debug, Clone, PartialEq)]
pub enum TrendField {
    Known(Vec<TrendSignal>),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Quiet,
    Normal,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityField {
    Known(ActivityLevel),
    Unknown,
}

/// Immutable environment snapshot, created once per engine cycle and discarded
/// after it.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub captured_at: DateTime<Utc>,
    pub hour_of_day: u32,
    pub weekday: Weekday,
    pub within_engagement_hours: bool,
    pub pending_events: Vec<InboundEvent>,
    pub trends: TrendField,
    pub platform_activity: ActivityField,
}

impl ContextSnapshot {
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.pending_events.len()
    }
}

/// Cached upstream feeds the analyzer reads non-destructively. Supplied by the
/// platform monitoring layer; `None` from the trend or activity reads maps to
/// the explicit `Unknown` markers.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events not yet resolved by a succeeded reply. Yielded every cycle until
    /// marked resolved.
    async fn unresolved_events(&self) -> Vec<InboundEvent>;

    async fn trend_signals(&self) -> Option<Vec<TrendSignal>>;

    async fn platform_activity(&self) -> Option<ActivityLevel>;

    /// Called by the dispatcher when a reply to this event succeeds.
    async fn mark_resolved(&self, event_id: &str);
}

/// Builds per-cycle snapshots. Side-effect free and infallible: unavailable
/// sources degrade to `Unknown` fields.
pub struct ContextAnalyzer {
    source: std::sync::Arc<dyn EventSource>,
}

impl ContextAnalyzer {
    #[must_use]
    pub fn new(source: std::sync::Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    pub async fn snapshot(&self, profile: &PersonaProfile, now: DateTime<Utc>) -> ContextSnapshot {
        let pending_events = self.source.unresolved_events().await;
        let trends = match self.source.trend_signals().await {
            Some(signals) => TrendField::Known(signals),
            None => TrendField::Unknown,
        };
        let platform_activity = match self.source.platform_activity().await {
            Some(level) => ActivityField::Known(level),
            None => ActivityField::Unknown,
        };

        let hour_of_day = now.hour();
        ContextSnapshot {
            captured_at: now,
            hour_of_day,
            weekday: now.weekday(),
            within_engagement_hours: profile.engagement_hours.contains(hour_of_day),
            pending_events,
            trends,
            platform_activity,
        }
    }
}

/// Event source with no upstream wiring: empty events, unknown trend and
/// activity feeds. Default for offline runs; tests use richer fakes.
#[derive(Default)]
pub struct StaticEventSource {
    events: Mutex<Vec<InboundEvent>>,
    resolved: Mutex<HashSet<String>>,
}

impl StaticEventSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: InboundEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn unresolved_events(&self) -> Vec<InboundEvent> {
        let resolved = self.resolved.lock().map(|r| r.clone()).unwrap_or_default();
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| !resolved.contains(e.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn trend_signals(&self) -> Option<Vec<TrendSignal>> {
        None
    }

    async fn platform_activity(&self) -> Option<ActivityLevel> {
        None
    }

    async fn mark_resolved(&self, event_id: &str) {
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(event_id.to_string());
        }
    }
}
