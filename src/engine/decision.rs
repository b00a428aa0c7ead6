use crate::engine::context::{ContextSnapshot, TrendField};
use crate::engine::state::{Mode, PersonaState};
use crate::persona::PersonaProfile;
use crate::platform::{ActionKind, ActionTarget};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why a decision was generated.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerFamily {
    Scheduled,
    Reactive,
    Proactive,
}

impl TriggerFamily {
    #[must_use]
    pub const fn base_weight(self) -> f64 {
        match self {
            Self::Reactive => 80.0,
            Self::Scheduled => 60.0,
            Self::Proactive => 40.0,
        }
    }

    /// Tie-break order on equal priority: responsiveness beats initiative.
    #[must_use]
    pub const fn tie_rank(self) -> u8 {
        match self {
            Self::Reactive => 0,
            Self::Scheduled => 1,
            Self::Proactive => 2,
        }
    }
}

/// Candidate action proposal. Consumed by the scheduler, which supersedes it
/// with a `ScheduledCommand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub kind: ActionKind,
    pub target: ActionTarget,
    /// Trend topic that drove a proactive candidate.
    pub topic: Option<String>,
    /// In [0, 100].
    pub priority: f64,
    pub trigger: TriggerFamily,
    pub idempotency_key: String,
    /// Inbound event a reactive candidate resolves on success.
    pub source_event_id: Option<String>,
}

/// Key grouping action + target + time bucket: only one in-flight execution
/// is permitted per key.
#[must_use]
pub fn idempotency_key(
    kind: ActionKind,
    target: &ActionTarget,
    now: DateTime<Utc>,
    bucket_minutes: u32,
) -> String {
    let bucket = now.timestamp() / (i64::from(bucket_minutes.max(1)) * 60);
    format!("{kind}:{target}:{bucket}")
}

/// Rank candidate actions for the current cycle. Pure: no I/O, no mutation,
/// identical inputs yield an identical ordered list. Malformed or missing
/// profile fields (zero cadence, no interests) degrade the corresponding
/// trigger family to an empty candidate set instead of failing the call.
#[must_use]
pub fn decide(
    context: &ContextSnapshot,
    state: &PersonaState,
    profile: &PersonaProfile,
    now: DateTime<Utc>,
) -> Vec<Decision> {
    let mut candidates = Vec::new();
    candidates.extend(scheduled_candidates(context, state, profile, now));
    candidates.extend(reactive_candidates(context, profile, now));
    candidates.extend(proactive_candidates(context, state, profile, now));

    for candidate in &mut candidates {
        let relevance = match candidate.trigger {
            TriggerFamily::Scheduled | TriggerFamily::Reactive => 1.0,
            TriggerFamily::Proactive => candidate.priority,
        };
        candidate.priority =
            (candidate.trigger.base_weight() * relevance * mood_modifier(state)).clamp(0.0, 100.0);
    }

    // Dedup by idempotency key, keeping the highest-priority candidate.
    let mut by_key: HashMap<String, Decision> = HashMap::new();
    for candidate in candidates {
        match by_key.get(&candidate.idempotency_key) {
            Some(existing) if existing.priority >= candidate.priority => {}
            _ => {
                by_key.insert(candidate.idempotency_key.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<Decision> = by_key.into_values().collect();
    ranked.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.trigger.tie_rank().cmp(&b.trigger.tie_rank()))
            .then_with(|| a.idempotency_key.cmp(&b.idempotency_key))
    });
    ranked
}

/// Mood lever on priority: 1.0 at baseline, range [0.5, 1.5].
fn mood_modifier(state: &PersonaState) -> f64 {
    0.5 + (state.mood.energy + state.mood.engagement) / 2.0
}

fn scheduled_candidates(
    context: &ContextSnapshot,
    state: &PersonaState,
    profile: &PersonaProfile,
    now: DateTime<Utc>,
) -> Vec<Decision> {
    if profile.cadence_minutes == 0 || !context.within_engagement_hours {
        return Vec::new();
    }

    // Reactive mode keeps posting but at half the rate.
    let cadence_minutes = match state.mode {
        Mode::Reactive => i64::from(profile.cadence_minutes) * 2,
        Mode::Proactive | Mode::Observative => i64::from(profile.cadence_minutes),
    };

    let due = state
        .last_originated_at
        .is_none_or(|last| now - last >= Duration::minutes(cadence_minutes));
    if !due || posting_window_saturated(state, profile, now) {
        return Vec::new();
    }

    let target = ActionTarget::None;
    vec![Decision {
        kind: ActionKind::Post,
        idempotency_key: idempotency_key(ActionKind::Post, &target, now, profile.key_bucket_minutes),
        target,
        topic: None,
        priority: 0.0,
        trigger: TriggerFamily::Scheduled,
        source_event_id: None,
    }]
}

fn reactive_candidates(
    context: &ContextSnapshot,
    profile: &PersonaProfile,
    now: DateTime<Utc>,
) -> Vec<Decision> {
    // Mentions are answered in any mode and outside engagement hours.
    context
        .pending_events
        .iter()
        .map(|event| {
            let target = ActionTarget::Tweet(event.tweet_id().to_string());
            Decision {
                kind: ActionKind::Reply,
                idempotency_key: idempotency_key(
                    ActionKind::Reply,
                    &target,
                    now,
                    profile.key_bucket_minutes,
                ),
                target,
                topic: None,
                priority: 0.0,
                trigger: TriggerFamily::Reactive,
                source_event_id: Some(event.id().to_string()),
            }
        })
        .collect()
}

fn proactive_candidates(
    context: &ContextSnapshot,
    state: &PersonaState,
    profile: &PersonaProfile,
    now: DateTime<Utc>,
) -> Vec<Decision> {
    if state.mode != Mode::Proactive
        || !context.within_engagement_hours
        || posting_window_saturated(state, profile, now)
    {
        return Vec::new();
    }
    let TrendField::Known(trends) = &context.trends else {
        return Vec::new();
    };

    trends
        .iter()
        .filter_map(|trend| {
            let interest = interest_match(profile, &trend.topic);
            if interest <= 0.0 {
                return None;
            }
            let relevance = (0.5 * interest + 0.5 * trend.velocity.clamp(0.0, 1.0)).clamp(0.0, 1.0);
            let target = ActionTarget::None;
            Some(Decision {
                kind: ActionKind::Post,
                idempotency_key: idempotency_key(
                    ActionKind::Post,
                    &target,
                    now,
                    profile.key_bucket_minutes,
                ),
                target,
                topic: Some(trend.topic.clone()),
                // Stashed relevance; the scoring pass folds it into priority.
                priority: relevance,
                trigger: TriggerFamily::Proactive,
                source_event_id: None,
            })
        })
        .collect()
}

/// Self-imposed volume limit on origination: once the persona has landed its
/// capacity of posts inside the rolling window, no new post candidates are
/// proposed until the window drains.
fn posting_window_saturated(
    state: &PersonaState,
    profile: &PersonaProfile,
    now: DateTime<Utc>,
) -> bool {
    let window = Duration::minutes(i64::from(profile.capacity_window_minutes));
    state.recent_count(ActionKind::Post, window, now) >= profile.capacity_per_window as usize
}

/// Deterministic keyword overlap between a trend topic and the persona's
/// interests and content focus, in [0, 1].
fn interest_match(profile: &PersonaProfile, topic: &str) -> f64 {
    let total = profile.topics().count();
    if total == 0 {
        return 0.0;
    }
    let topic_lower = topic.to_lowercase();
    let matched = profile
        .topics()
        .filter(|candidate| {
            let candidate = candidate.to_lowercase();
            topic_lower.contains(&candidate) || candidate.contains(&topic_lower)
        })
        .count();
    matched as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{
        ActivityField, ContextSnapshot, InboundEvent, TrendSignal,
    };
    use chrono::{Datelike, TimeZone, Timelike, Utc};

    fn profile() -> PersonaProfile {
        let mut profile = PersonaProfile::named("ada", "Ada");
        profile.interests = vec!["rust".into(), "distributed systems".into()];
        profile
    }

    fn context_at(now: DateTime<Utc>) -> ContextSnapshot {
        ContextSnapshot {
            captured_at: now,
            hour_of_day: now.hour(),
            weekday: now.weekday(),
            within_engagement_hours: true,
            pending_events: Vec::new(),
            trends: TrendField::Unknown,
            platform_activity: ActivityField::Unknown,
        }
    }

    fn mention(id: &str, tweet_id: &str) -> InboundEvent {
        InboundEvent::Mention {
            id: id.into(),
            tweet_id: tweet_id.into(),
            author: "someone".into(),
            text: "what do you think?".into(),
            received_at: Utc::now(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn decide_is_deterministic() {
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.pending_events = vec![mention("m1", "t1"), mention("m2", "t2")];
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "rust 2.0".into(),
            velocity: 0.8,
        }]);

        let first = decide(&context, &state, &profile, now);
        let second = decide(&context, &state, &profile, now);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn fresh_proactive_state_emits_one_scheduled_candidate() {
        // No inbound events, Proactive mode, no post inside the cadence
        // window: exactly one scheduled candidate at or above its base weight.
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let context = context_at(now);

        let decisions = decide(&context, &state, &profile, now);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].trigger, TriggerFamily::Scheduled);
        assert!(decisions[0].priority >= TriggerFamily::Scheduled.base_weight());
    }

    #[test]
    fn saturated_posting_window_suppresses_origination() {
        use crate::engine::scheduler::CommandStatus;
        use crate::memory::OutcomeRecord;

        let profile = profile();
        let now = now();
        let mut state = PersonaState::new(&profile, now);
        for i in 0..profile.capacity_per_window {
            let record = OutcomeRecord {
                command_id: format!("c{i}"),
                persona_id: profile.id.clone(),
                kind: ActionKind::Post,
                trigger: TriggerFamily::Scheduled,
                target: ActionTarget::None,
                status: CommandStatus::Succeeded,
                attempts: 1,
                platform_id: None,
                error: None,
                latency_ms: Some(10),
                recorded_at: now,
            };
            state.observe_outcome(&record, now);
        }
        // Clear cadence accounting so only the volume window gates.
        state.last_originated_at = None;
        let mut context = context_at(now);
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "rust".into(),
            velocity: 1.0,
        }]);

        let decisions = decide(&context, &state, &profile, now);
        assert!(decisions.iter().all(|d| d.kind != ActionKind::Post));
    }

    #[test]
    fn recent_post_suppresses_scheduled_candidate() {
        let profile = profile();
        let now = now();
        let mut state = PersonaState::new(&profile, now);
        state.last_originated_at = Some(now - Duration::minutes(5));

        let decisions = decide(&context_at(now), &state, &profile, now);
        assert!(decisions.is_empty());
    }

    #[test]
    fn reactive_candidates_cover_each_pending_event() {
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.pending_events = vec![mention("m1", "t1"), mention("m2", "t2")];

        let decisions = decide(&context, &state, &profile, now);
        let replies: Vec<&Decision> = decisions
            .iter()
            .filter(|d| d.trigger == TriggerFamily::Reactive)
            .collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|d| d.kind == ActionKind::Reply));
        assert!(replies.iter().all(|d| d.source_event_id.is_some()));
    }

    #[test]
    fn reactive_outranks_scheduled() {
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.pending_events = vec![mention("m1", "t1")];

        let decisions = decide(&context, &state, &profile, now);
        assert_eq!(decisions[0].trigger, TriggerFamily::Reactive);
    }

    #[test]
    fn tie_break_prefers_reactive_family() {
        // Same priority, different family: reactive first.
        assert!(TriggerFamily::Reactive.tie_rank() < TriggerFamily::Scheduled.tie_rank());
        assert!(TriggerFamily::Scheduled.tie_rank() < TriggerFamily::Proactive.tie_rank());
    }

    #[test]
    fn observative_mode_suppresses_proactive() {
        let profile = profile();
        let now = now();
        let mut state = PersonaState::new(&profile, now);
        state.mode = Mode::Observative;
        state.last_originated_at = Some(now - Duration::minutes(5));
        let mut context = context_at(now);
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "rust release".into(),
            velocity: 1.0,
        }]);

        let decisions = decide(&context, &state, &profile, now);
        assert!(decisions.iter().all(|d| d.trigger != TriggerFamily::Proactive));
    }

    #[test]
    fn reactive_mode_halves_scheduled_rate() {
        let profile = profile();
        let now = now();
        let mut state = PersonaState::new(&profile, now);
        state.mode = Mode::Reactive;
        // Past one cadence interval but inside the doubled one.
        state.last_originated_at =
            Some(now - Duration::minutes(i64::from(profile.cadence_minutes) + 10));

        let decisions = decide(&context_at(now), &state, &profile, now);
        assert!(decisions.iter().all(|d| d.trigger != TriggerFamily::Scheduled));
    }

    #[test]
    fn empty_interests_degrade_proactive_family_only() {
        let mut profile = profile();
        profile.interests.clear();
        profile.content_focus.clear();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "anything".into(),
            velocity: 1.0,
        }]);

        let decisions = decide(&context, &state, &profile, now);
        assert!(decisions.iter().all(|d| d.trigger != TriggerFamily::Proactive));
        // Scheduled family is unaffected.
        assert!(decisions.iter().any(|d| d.trigger == TriggerFamily::Scheduled));
    }

    #[test]
    fn unknown_trends_yield_no_proactive_candidates() {
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let context = context_at(now); // trends Unknown

        let decisions = decide(&context, &state, &profile, now);
        assert!(decisions.iter().all(|d| d.trigger != TriggerFamily::Proactive));
    }

    #[test]
    fn proactive_and_scheduled_sharing_a_key_dedup_to_highest() {
        // Both families propose a Post with target None in the same bucket;
        // only the higher-priority one survives.
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "rust".into(),
            velocity: 1.0,
        }]);

        let decisions = decide(&context, &state, &profile, now);
        let posts: Vec<&Decision> = decisions
            .iter()
            .filter(|d| d.kind == ActionKind::Post)
            .collect();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].trigger, TriggerFamily::Scheduled);
    }

    #[test]
    fn outside_engagement_hours_only_reactive_survives() {
        let profile = profile();
        let now = now();
        let state = PersonaState::new(&profile, now);
        let mut context = context_at(now);
        context.within_engagement_hours = false;
        context.pending_events = vec![mention("m1", "t1")];
        context.trends = TrendField::Known(vec![TrendSignal {
            topic: "rust".into(),
            velocity: 1.0,
        }]);

        let decisions = decide(&context, &state, &profile, now);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].trigger, TriggerFamily::Reactive);
    }

    #[test]
    fn priorities_stay_in_range() {
        let profile = profile();
        let now = now();
        let mut state = PersonaState::new(&profile, now);
        state.mood.nudge(0.5, 0.5, 0.5); // max mood modifier
        let mut context = context_at(now);
        context.pending_events = vec![mention("m1", "t1")];

        let decisions = decide(&context, &state, &profile, now);
        assert!(decisions
            .iter()
            .all(|d| (0.0..=100.0).contains(&d.priority)));
    }

    #[test]
    fn idempotency_key_buckets_by_time() {
        let target = ActionTarget::None;
        let t0 = now();
        let same_bucket = t0 + Duration::minutes(5);
        let next_bucket = t0 + Duration::minutes(20);

        let k0 = idempotency_key(ActionKind::Post, &target, t0, 15);
        assert_eq!(k0, idempotency_key(ActionKind::Post, &target, same_bucket, 15));
        assert_ne!(k0, idempotency_key(ActionKind::Post, &target, next_bucket, 15));
    }
}
