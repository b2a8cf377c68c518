//! # Backoff Calculator
//!
//! Exponential backoff for polling dispatched model runs.
//!
//! ## Overview
//!
//! `delay(attempt) = min(base * multiplier^attempt * (1 + j), max)` where `j`
//! is drawn from `[0, max_jitter]` when jitter is enabled. Jitter only ever
//! lengthens a delay and is bounded by `multiplier - 1`, so the delay for
//! attempt `n + 1` is never shorter than the delay for attempt `n` whatever
//! jitter either draw got.
//!
//! ## Key Features
//!
//! - **Exponential Backoff**: Configurable base delay with exponential growth
//! - **Jitter Support**: Spreads polls of runs dispatched together
//! - **Maximum Delay Caps**: Prevent unbounded backoff growth
//! - **Validation**: Rejects jitter that could make delays shrink

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{BackoffConfig, OrchestrationConfig};

/// Configuration for backoff calculation behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffCalculatorConfig {
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Exponential multiplier (default: 2.0)
    pub multiplier: f64,
    /// Whether to add jitter
    pub jitter_enabled: bool,
    /// Maximum jitter fraction, at most `multiplier - 1`
    pub max_jitter: f64,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffCalculatorConfig {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier,
            jitter_enabled: config.jitter_enabled,
            max_jitter: config.max_jitter,
        }
    }
}

impl BackoffCalculatorConfig {
    /// Growing delay between poll rounds of one activation; no jitter
    pub fn for_rounds(config: &OrchestrationConfig) -> Self {
        Self {
            base_delay_ms: config.round_delay_ms,
            max_delay_ms: config.max_round_delay_ms,
            multiplier: config.round_delay_multiplier,
            jitter_enabled: false,
            max_jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), BackoffError> {
        if !(self.multiplier >= 1.0) {
            return Err(BackoffError::InvalidConfig(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(BackoffError::InvalidConfig(format!(
                "max delay {}ms is below base delay {}ms",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.jitter_enabled && !(0.0..=self.multiplier - 1.0).contains(&self.max_jitter) {
            return Err(BackoffError::InvalidConfig(format!(
                "max_jitter {} must be within [0, {}]",
                self.max_jitter,
                self.multiplier - 1.0
            )));
        }
        Ok(())
    }
}

/// Errors that can occur during backoff calculation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Computes wait times between attempts
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Result<Self, BackoffError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay for `attempt` (zero-based) with an explicit jitter fraction
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let jitter = if self.config.jitter_enabled {
            jitter.clamp(0.0, self.config.max_jitter)
        } else {
            0.0
        };

        let uncapped = self.config.base_delay_ms as f64
            * self.config.multiplier.powi(exponent)
            * (1.0 + jitter);
        // overflow to infinity lands on the cap
        let millis = uncapped.min(self.config.max_delay_ms as f64);

        Duration::from_millis(millis.round() as u64)
    }

    /// Delay without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 0.0)
    }

    /// Delay with a random jitter draw
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.config.jitter_enabled || self.config.max_jitter <= 0.0 {
            return self.base_delay(attempt);
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.config.max_jitter);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Jitter-free delays for the first `attempts` attempts
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts).map(|attempt| self.base_delay(attempt)).collect()
    }
}
