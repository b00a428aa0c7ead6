pub mod schema;

pub use schema::{Config, DispatcherConfig, EngineConfig, RateLimitConfig, RateLimitsConfig};
