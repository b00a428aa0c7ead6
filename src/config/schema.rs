use crate::error::ConfigError;
use crate::platform::ActionKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine-wide configuration. Persona-scoped behavior knobs live in
/// [`crate::persona::PersonaProfile`]; this covers everything shared across
/// personas: cycle timing, dispatcher bounds, and platform rate limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cycle loop interval.
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// Persona the daemon runs by default.
    #[serde(default = "default_persona_id")]
    pub persona_id: String,
    /// How far back the state tracker reads recent outcomes.
    #[serde(default = "default_outcome_window_minutes")]
    pub outcome_window_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            persona_id: default_persona_id(),
            outcome_window_minutes: default_outcome_window_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Global in-flight command bound.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// In-flight bound per action kind.
    #[serde(default = "default_per_kind_concurrency")]
    pub per_kind_concurrency: usize,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_kind_concurrency: default_per_kind_concurrency(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            rate_limits: RateLimitsConfig::default(),
        }
    }
}

/// Token-bucket sizing per action kind, mirroring the platform's 15-minute
/// request windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_rate_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_post_limit")]
    pub post: u32,
    #[serde(default = "default_post_limit")]
    pub reply: u32,
    #[serde(default = "default_post_limit")]
    pub retweet: u32,
    #[serde(default = "default_like_limit")]
    pub like: u32,
    #[serde(default = "default_follow_limit")]
    pub follow: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_rate_window_minutes(),
            post: default_post_limit(),
            reply: default_post_limit(),
            retweet: default_post_limit(),
            like: default_like_limit(),
            follow: default_follow_limit(),
        }
    }
}

impl RateLimitsConfig {
    #[must_use]
    pub const fn limit_for(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Post => self.post,
            ActionKind::Reply => self.reply,
            ActionKind::Retweet => self.retweet,
            ActionKind::Like => self.like,
            ActionKind::Follow => self.follow,
        }
    }
}

/// Per-kind bucket parameters derived from config.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

impl RateLimitsConfig {
    #[must_use]
    pub const fn bucket_for(&self, kind: ActionKind) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.limit_for(kind),
            window_secs: self.window_minutes as u64 * 60,
        }
    }
}

impl Config {
    /// Load `config.toml` from the workspace, writing defaults on first run.
    pub fn load_or_init() -> Result<Self> {
        let workspace = Self::default_workspace()?;
        Self::load_from(&workspace)
    }

    pub fn load_from(workspace: &Path) -> Result<Self> {
        std::fs::create_dir_all(workspace)
            .with_context(|| format!("failed creating workspace: {}", workspace.display()))?;

        let path = workspace.join("config.toml");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed reading config: {}", path.display()))?;
            toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?
        } else {
            let config = Self::default();
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed writing default config: {}", path.display()))?;
            config
        };

        config.workspace_dir = workspace.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn default_workspace() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("MAGPIE_WORKSPACE") {
            return Ok(PathBuf::from(dir));
        }
        let dirs = directories::ProjectDirs::from("", "", "magpie")
            .ok_or_else(|| ConfigError::Load("no home directory available".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cycle_secs == 0 {
            return Err(ConfigError::Validation("engine.cycle_secs must be positive".into()));
        }
        if self.dispatcher.max_concurrency == 0 || self.dispatcher.per_kind_concurrency == 0 {
            return Err(ConfigError::Validation(
                "dispatcher concurrency bounds must be positive".into(),
            ));
        }
        if self.dispatcher.backoff_base_ms == 0 {
            return Err(ConfigError::Validation(
                "dispatcher.backoff_base_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_cycle_secs() -> u64 {
    30
}
fn default_persona_id() -> String {
    "local-default".into()
}
fn default_outcome_window_minutes() -> u32 {
    24 * 60
}
fn default_max_concurrency() -> usize {
    4
}
fn default_per_kind_concurrency() -> usize {
    1
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_rate_window_minutes() -> u32 {
    15
}
fn default_post_limit() -> u32 {
    300
}
fn default_like_limit() -> u32 {
    1000
}
fn default_follow_limit() -> u32 {
    400
}
