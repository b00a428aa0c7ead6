use crate::engine::context::ContextSnapshot;
use crate::engine::decision::TriggerFamily;
use crate::memory::OutcomeRecord;
use crate::persona::{MoodBaseline, PersonaProfile};
use crate::platform::ActionKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Persona operating posture. Governs how much initiative the decision maker
/// takes versus how conservatively it behaves.
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
pub enum Mode {
    Proactive,
    Reactive,
    Observative,
}

impl Mode {
    /// Risk ordering used to break transition ties: the most conservative
    /// fired transition wins.
    #[must_use]
    pub const fn conservatism(self) -> u8 {
        match self {
            Self::Proactive => 0,
            Self::Reactive => 1,
            Self::Observative => 2,
        }
    }
}

/// Decaying mood signal. Dimensions live in [0, 1]; each decays toward the
/// persona baseline with `v' = b + (v - b) * exp(-Δt / τ)`.
#[derive(Debug, Clone, Copy)]
pub struct MoodVector {
    pub energy: f64,
    pub positivity: f64,
    pub engagement: f64,
    updated_at: DateTime<Utc>,
}

impl MoodVector {
    #[must_use]
    pub fn at_baseline(baseline: MoodBaseline, now: DateTime<Utc>) -> Self {
        Self {
            energy: baseline.energy,
            positivity: baseline.positivity,
            engagement: baseline.engagement,
            updated_at: now,
        }
    }

    pub fn decay(&mut self, baseline: MoodBaseline, tau_secs: u64, now: DateTime<Utc>) {
        let elapsed = (now - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        if elapsed <= 0.0 {
            return;
        }
        let factor = (-elapsed / tau_secs.max(1) as f64).exp();
        self.energy = baseline.energy + (self.energy - baseline.energy) * factor;
        self.positivity = baseline.positivity + (self.positivity - baseline.positivity) * factor;
        self.engagement = baseline.engagement + (self.engagement - baseline.engagement) * factor;
        self.updated_at = now;
    }

    /// Largest deviation from baseline across dimensions.
    #[must_use]
    pub fn volatility(&self, baseline: MoodBaseline) -> f64 {
        (self.energy - baseline.energy)
            .abs()
            .max((self.positivity - baseline.positivity).abs())
            .max((self.engagement - baseline.engagement).abs())
    }

    pub fn nudge(&mut self, d_energy: f64, d_positivity: f64, d_engagement: f64) {
        self.energy = (self.energy + d_energy).clamp(0.0, 1.0);
        self.positivity = (self.positivity + d_positivity).clamp(0.0, 1.0);
        self.engagement = (self.engagement + d_engagement).clamp(0.0, 1.0);
    }
}

/// Mutable persona-scoped operating state. Owned by the state tracker; the
/// dispatcher's result-folding step mutates it through the same lock the
/// cycle update uses, so there is a single mutation point per cycle.
#[derive(Debug, Clone)]
pub struct PersonaState {
    pub mode: Mode,
    pub mood: MoodVector,
    /// Sliding window of succeeded actions, for self-imposed rate limits.
    recent_actions: VecDeque<(DateTime<Utc>, ActionKind)>,
    pub last_originated_at: Option<DateTime<Utc>>,
    pub low_engagement_cycles: u32,
    born_at: DateTime<Utc>,
}

impl PersonaState {
    #[must_use]
    pub fn new(profile: &PersonaProfile, now: DateTime<Utc>) -> Self {
        Self {
            mode: Mode::Proactive,
            mood: MoodVector::at_baseline(profile.mood_baseline, now),
            recent_actions: VecDeque::new(),
            last_originated_at: None,
            low_engagement_cycles: 0,
            born_at: now,
        }
    }

    /// Succeeded actions of `kind` inside the trailing `window`.
    #[must_use]
    pub fn recent_count(&self, kind: ActionKind, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.recent_actions
            .iter()
            .filter(|(at, k)| *k == kind && *at >= cutoff)
            .count()
    }

    /// Per-cycle update: mood decay, engagement accounting, then the mode
    /// transition. `outcomes_since_last_cycle` is what the dispatcher
    /// finalized since the previous tick. Returns the transition when the
    /// mode changed.
    pub fn update_cycle(
        &mut self,
        profile: &PersonaProfile,
        context: &ContextSnapshot,
        outcomes_since_last_cycle: &[OutcomeRecord],
        now: DateTime<Utc>,
    ) -> Option<(Mode, Mode)> {
        self.mood
            .decay(profile.mood_baseline, profile.mood_half_life_secs, now);
        self.prune_window(profile, now);

        let engaged = context.backlog() > 0
            || outcomes_since_last_cycle.iter().any(OutcomeRecord::succeeded);
        if engaged {
            self.low_engagement_cycles = 0;
        } else {
            self.low_engagement_cycles = self.low_engagement_cycles.saturating_add(1);
        }

        let idle_for = now - self.last_originated_at.unwrap_or(self.born_at);
        let next = next_mode(
            self.mode,
            context.backlog(),
            idle_for,
            self.low_engagement_cycles,
            self.mood.volatility(profile.mood_baseline),
            profile,
        );

        if next == self.mode {
            None
        } else {
            let previous = std::mem::replace(&mut self.mode, next);
            tracing::info!(from = %previous, to = %next, "mode transition");
            Some((previous, next))
        }
    }

    /// Fold one dispatched command's terminal outcome into mood and counters.
    pub fn observe_outcome(&mut self, record: &OutcomeRecord, now: DateTime<Utc>) {
        if record.succeeded() {
            self.recent_actions.push_back((now, record.kind));
            if record.trigger != TriggerFamily::Reactive {
                self.last_originated_at = Some(now);
            }
            self.mood.nudge(0.02, 0.05, 0.05);
        } else {
            self.mood.nudge(-0.02, -0.05, -0.02);
        }
    }

    fn prune_window(&mut self, profile: &PersonaProfile, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(i64::from(profile.capacity_window_minutes));
        while let Some((at, _)) = self.recent_actions.front() {
            if *at < cutoff {
                self.recent_actions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Deterministic, total transition policy. Multiple fired rules resolve to
/// the most conservative target; no fired rule keeps the current mode.
#[must_use]
pub fn next_mode(
    current: Mode,
    backlog: usize,
    idle_for: Duration,
    low_engagement_cycles: u32,
    volatility: f64,
    profile: &PersonaProfile,
) -> Mode {
    let mut fired: Vec<Mode> = Vec::with_capacity(3);

    if idle_for > Duration::minutes(i64::from(profile.max_idle_minutes)) {
        fired.push(Mode::Proactive);
    }
    if current == Mode::Proactive && backlog > profile.backlog_threshold {
        fired.push(Mode::Reactive);
    }
    if current == Mode::Reactive
        && low_engagement_cycles > profile.low_engagement_cycle_threshold
        && volatility <= profile.volatility_ceiling
    {
        fired.push(Mode::Observative);
    }

    fired
        .into_iter()
        .max_by_key(|mode| mode.conservatism())
        .unwrap_or(current)
}
