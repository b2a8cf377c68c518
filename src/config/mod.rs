//! # Engine Configuration
//!
//! Typed configuration for the forecast execution engine, loaded in layers by
//! [`ConfigManager`]: built-in defaults, then an optional TOML file, then
//! `SEISMO__SECTION__KEY` environment overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use seismo_forecast::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let backoff = &manager.config().backoff;
//! println!("first poll after {:?}", backoff.base_delay());
//! # Ok(())
//! # }
//! ```
//!
//! Every section has defaults, so a partial file only needs the keys it
//! changes. Durations are stored as integer milliseconds or seconds with
//! `Duration` accessors.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded parallelism for remote calls
    pub execution: ExecutionConfig,

    /// Poll backoff and failure budget
    pub backoff: BackoffConfig,

    /// Poll rounds and run timeout
    pub orchestration: OrchestrationConfig,

    /// HTTP client settings for model workers
    pub worker_client: WorkerClientConfig,

    /// Exclusive resource reservation
    pub reservation: ReservationConfig,

    /// Status change broadcasting
    pub events: EventsConfig,

    /// Postgres store connection
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrent_remote_calls: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_remote_calls: system::DEFAULT_MAX_CONCURRENT_REMOTE_CALLS,
        }
    }
}

/// Backoff between queries of one dispatched run
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Upper bound of the multiplicative jitter fraction
    pub max_jitter: f64,
    /// Consecutive failed queries tolerated before the run is failed
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
            max_retries: 5,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Queries per run per poll round
    pub max_polls_per_round: u32,
    pub round_delay_ms: u64,
    pub max_round_delay_ms: u64,
    pub round_delay_multiplier: f64,
    /// Stop after this many poll rounds; unbounded when unset
    pub max_rounds: Option<u32>,
    /// Fail runs dispatched longer ago than this; unbounded when unset
    pub run_timeout_seconds: Option<u64>,
    /// Refresh catalog and hydraulics before dispatching
    pub refresh_inputs: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_polls_per_round: 20,
            round_delay_ms: 30_000,
            max_round_delay_ms: 600_000,
            round_delay_multiplier: 1.5,
            max_rounds: None,
            run_timeout_seconds: Some(86_400),
            refresh_inputs: true,
        }
    }
}

impl OrchestrationConfig {
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerClientConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            user_agent: format!("seismo-forecast/{}", system::ENGINE_VERSION),
        }
    }
}

impl WorkerClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReservationConfig {
    pub acquire_timeout_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 60_000,
        }
    }
}

impl ReservationConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Falls back to `DATABASE_URL` when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

impl EngineConfig {
    /// Check bounds and cross-field relations
    pub fn validate(&self) -> ConfigResult<()> {
        let calls = self.execution.max_concurrent_remote_calls;
        if calls == 0 || calls > system::MAX_CONCURRENT_REMOTE_CALLS_LIMIT {
            return Err(ConfigurationError::invalid_value(
                "execution.max_concurrent_remote_calls",
                calls,
                format!(
                    "must be between 1 and {}",
                    system::MAX_CONCURRENT_REMOTE_CALLS_LIMIT
                ),
            ));
        }

        let backoff = &self.backoff;
        if backoff.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.base_delay_ms",
                backoff.base_delay_ms,
                "must be positive",
            ));
        }
        if backoff.max_delay_ms < backoff.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_ms",
                backoff.max_delay_ms,
                "must not be smaller than backoff.base_delay_ms",
            ));
        }
        if !(backoff.multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                backoff.multiplier,
                "must be >= 1.0",
            ));
        }
        if !(0.0..=backoff.multiplier - 1.0).contains(&backoff.max_jitter) {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_jitter",
                backoff.max_jitter,
                "must be within [0, multiplier - 1] so delays never decrease",
            ));
        }

        let orchestration = &self.orchestration;
        if orchestration.max_polls_per_round == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.max_polls_per_round",
                orchestration.max_polls_per_round,
                "must be positive",
            ));
        }
        if !(orchestration.round_delay_multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "orchestration.round_delay_multiplier",
                orchestration.round_delay_multiplier,
                "must be >= 1.0",
            ));
        }
        if orchestration.max_round_delay_ms < orchestration.round_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "orchestration.max_round_delay_ms",
                orchestration.max_round_delay_ms,
                "must not be smaller than orchestration.round_delay_ms",
            ));
        }
        if orchestration.run_timeout_seconds == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "orchestration.run_timeout_seconds",
                0,
                "must be positive when set",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_duration_helpers() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff.base_delay(), Duration::from_secs(5));
        assert_eq!(config.orchestration.round_delay(), Duration::from_secs(30));
        assert_eq!(
            config.orchestration.run_timeout(),
            Some(Duration::from_secs(86_400))
        );
        assert_eq!(config.worker_client.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_must_not_exceed_growth() {
        let mut config = EngineConfig::default();
        config.backoff.multiplier = 1.5;
        config.backoff.max_jitter = 0.6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff.max_jitter"));
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = EngineConfig::default();
        config.execution.max_concurrent_remote_calls = 0;
        assert!(config.validate().is_err());
        config.execution.max_concurrent_remote_calls = 65;
        assert!(config.validate().is_err());
        config.execution.max_concurrent_remote_calls = 64;
        assert!(config.validate().is_ok());
    }
}
