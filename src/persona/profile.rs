use crate::error::{ConfigError, ValidationError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persona behavior profile: everything persona-scoped that shapes how the
/// engine decides, schedules, and retries. Profile *generation* lives in the
/// character system; this core only reads profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,

    /// Topics the persona cares about; drives proactive trend matching.
    #[serde(default)]
    pub interests: Vec<String>,
    /// Preferred content themes, merged with interests for relevance scoring.
    #[serde(default)]
    pub content_focus: Vec<String>,

    /// Baseline posting cadence. Zero disables scheduled posts.
    #[serde(default = "default_cadence_minutes")]
    pub cadence_minutes: u32,
    #[serde(default)]
    pub engagement_hours: EngagementHours,

    #[serde(default)]
    pub mood_baseline: MoodBaseline,
    /// Mood decay time constant τ.
    #[serde(default = "default_mood_half_life_secs")]
    pub mood_half_life_secs: u64,

    /// Inbound backlog above this flips Proactive → Reactive.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,
    /// Consecutive low-engagement cycles above this (with calm mood) flips
    /// Reactive → Observative.
    #[serde(default = "default_low_engagement_cycles")]
    pub low_engagement_cycle_threshold: u32,
    /// Mood volatility at or below this counts as calm.
    #[serde(default = "default_volatility_ceiling")]
    pub volatility_ceiling: f64,
    /// Idle longer than this forces Mode back to Proactive.
    #[serde(default = "default_max_idle_minutes")]
    pub max_idle_minutes: u32,

    /// Dispatch attempts per command before FAILED.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Execution window length: `deadline = not_before + this`.
    #[serde(default = "default_deadline_minutes")]
    pub deadline_minutes: u32,
    /// Minimum spacing between same-kind commands.
    #[serde(default = "default_min_spacing_minutes")]
    pub min_spacing_minutes: u32,
    /// Random slot jitter added on top of spacing, to avoid robotic regularity.
    #[serde(default = "default_jitter_minutes")]
    pub jitter_minutes: u32,

    /// Self-imposed cap: commands per kind per rolling window.
    #[serde(default = "default_capacity_per_window")]
    pub capacity_per_window: u32,
    #[serde(default = "default_capacity_window_minutes")]
    pub capacity_window_minutes: u32,
    /// Pending commands per kind beyond which overflow is rejected instead of
    /// queued.
    #[serde(default = "default_backlog_ceiling")]
    pub backlog_ceiling: usize,

    /// Idempotency time-bucket width.
    #[serde(default = "default_key_bucket_minutes")]
    pub key_bucket_minutes: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngagementHours {
    pub start: u32,
    pub end: u32,
}

impl Default for EngagementHours {
    fn default() -> Self {
        Self { start: 0, end: 23 }
    }
}

impl EngagementHours {
    /// Inclusive window check in UTC hours. A start after the end wraps over
    /// midnight.
    #[must_use]
    pub const fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Resting point each mood dimension decays toward. Dimensions live in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MoodBaseline {
    pub energy: f64,
    pub positivity: f64,
    pub engagement: f64,
}

impl Default for MoodBaseline {
    fn default() -> Self {
        Self {
            energy: 0.5,
            positivity: 0.5,
            engagement: 0.5,
        }
    }
}

impl PersonaProfile {
    /// Minimal profile with defaulted behavior knobs.
    #[must_use]
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: sanitize(&id.into()),
            name: name.into(),
            interests: Vec::new(),
            content_focus: Vec::new(),
            cadence_minutes: default_cadence_minutes(),
            engagement_hours: EngagementHours::default(),
            mood_baseline: MoodBaseline::default(),
            mood_half_life_secs: default_mood_half_life_secs(),
            backlog_threshold: default_backlog_threshold(),
            low_engagement_cycle_threshold: default_low_engagement_cycles(),
            volatility_ceiling: default_volatility_ceiling(),
            max_idle_minutes: default_max_idle_minutes(),
            max_attempts: default_max_attempts(),
            deadline_minutes: default_deadline_minutes(),
            min_spacing_minutes: default_min_spacing_minutes(),
            jitter_minutes: default_jitter_minutes(),
            capacity_per_window: default_capacity_per_window(),
            capacity_window_minutes: default_capacity_window_minutes(),
            backlog_ceiling: default_backlog_ceiling(),
            key_bucket_minutes: default_key_bucket_minutes(),
        }
    }

    /// Structural validation. Degradable fields (empty interests, zero
    /// cadence) are deliberately not errors: they disable a trigger family
    /// instead of failing the persona.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Profile {
                field: "id".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.engagement_hours.start > 23 || self.engagement_hours.end > 23 {
            return Err(ValidationError::Profile {
                field: "engagement_hours".into(),
                reason: "hours must be within 0..=23".into(),
            });
        }
        if self.mood_half_life_secs == 0 {
            return Err(ValidationError::Profile {
                field: "mood_half_life_secs".into(),
                reason: "must be positive".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ValidationError::Profile {
                field: "max_attempts".into(),
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.deadline_minutes == 0 {
            return Err(ValidationError::Profile {
                field: "deadline_minutes".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Interests and content focus merged for relevance scoring.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.interests
            .iter()
            .chain(self.content_focus.iter())
            .map(String::as_str)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_cadence_minutes() -> u32 {
    90
}
fn default_mood_half_life_secs() -> u64 {
    3600
}
fn default_backlog_threshold() -> usize {
    3
}
fn default_low_engagement_cycles() -> u32 {
    6
}
fn default_volatility_ceiling() -> f64 {
    0.15
}
fn default_max_idle_minutes() -> u32 {
    240
}
fn default_max_attempts() -> u32 {
    5
}
fn default_deadline_minutes() -> u32 {
    30
}
fn default_min_spacing_minutes() -> u32 {
    10
}
fn default_jitter_minutes() -> u32 {
    5
}
fn default_capacity_per_window() -> u32 {
    6
}
fn default_capacity_window_minutes() -> u32 {
    60
}
fn default_backlog_ceiling() -> usize {
    8
}
fn default_key_bucket_minutes() -> u32 {
    15
}

/// Read-only profile source (the character generation system owns mutation).
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn profile(&self, persona_id: &str) -> Result<PersonaProfile>;
}

/// Provider backed by a toml file per persona in the workspace, the same shape
/// `magpie profile show` prints.
pub struct StaticProfileProvider {
    dir: std::path::PathBuf,
}

impl StaticProfileProvider {
    #[must_use]
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load_file(path: &Path) -> Result<PersonaProfile> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading profile: {}", path.display()))?;
        let profile: PersonaProfile = toml::from_str(&raw)
            .map_err(|e| ConfigError::Load(format!("profile parse: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }
}

#[async_trait]
impl ProfileProvider for StaticProfileProvider {
    async fn profile(&self, persona_id: &str) -> Result<PersonaProfile> {
        let path = self.dir.join(format!("{}.toml", sanitize(persona_id)));
        if path.exists() {
            Self::load_file(&path)
        } else {
            Ok(PersonaProfile::named(persona_id, persona_id))
        }
    }
}
