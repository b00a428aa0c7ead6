use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `Magpie`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Validation (malformed decision / profile) ───────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Platform ────────────────────────────────────────────────────────
    #[error("platform: {0}")]
    Platform(#[from] PlatformError),

    // ── Memory store ────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Validation errors ──────────────────────────────────────────────────────

/// Malformed local input. Never retried; the offending decision or profile
/// field is rejected and the rejection is recorded.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("profile field {field} invalid: {reason}")]
    Profile { field: String, reason: String },
}

// ─── Platform errors ────────────────────────────────────────────────────────

/// Classified outcome of a platform call. The dispatcher branches on
/// [`PlatformError::is_recoverable`] to choose between backoff retry and an
/// immediate FAILED terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("rate-limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("platform call timed out after {0}ms")]
    Timeout(u64),

    #[error("permanent platform error: {0}")]
    Permanent(String),

    #[error("authorization failed")]
    Unauthorized,
}

impl PlatformError {
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}

// ─── Memory store errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("append failed: {0}")]
    Append(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = EngineError::Config(ConfigError::Validation("bad cadence".into()));
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn rate_limited_is_recoverable() {
        let err = PlatformError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn permanent_errors_are_not_recoverable() {
        assert!(!PlatformError::Permanent("deleted tweet".into()).is_recoverable());
        assert!(!PlatformError::Unauthorized.is_recoverable());
        assert!(PlatformError::Timeout(5000).is_recoverable());
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let engine_err: EngineError = anyhow_err.into();
        assert!(engine_err.to_string().contains("something went wrong"));
    }

    #[test]
    fn profile_validation_names_the_field() {
        let err = EngineError::Validation(ValidationError::Profile {
            field: "engagement_hours".into(),
            reason: "start must be 0..=23".into(),
        });
        assert!(err.to_string().contains("engagement_hours"));
    }
}
