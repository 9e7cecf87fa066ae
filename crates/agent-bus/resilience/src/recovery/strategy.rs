//! Recovery strategies, policies and backoff.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;

/// How retries of a failed recovery are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    ExponentialBackoff,
    LinearBackoff,
    Immediate,
    /// Never attempted automatically; waits for an operator.
    Manual,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::ExponentialBackoff => write!(f, "EXPONENTIAL_BACKOFF"),
            RecoveryStrategy::LinearBackoff => write!(f, "LINEAR_BACKOFF"),
            RecoveryStrategy::Immediate => write!(f, "IMMEDIATE"),
            RecoveryStrategy::Manual => write!(f, "MANUAL"),
        }
    }
}

/// Probe deciding whether a service has recovered.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> bool;
}

/// Per-service recovery policy.
#[derive(Clone)]
pub struct RecoveryPolicy {
    pub strategy: RecoveryStrategy,
    pub max_retry_attempts: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Without a health check an attempt counts as successful.
    pub health_check: Option<Arc<dyn HealthCheck>>,
}

impl RecoveryPolicy {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            strategy: config.default_strategy,
            max_retry_attempts: config.max_retry_attempts,
            backoff_multiplier: config.backoff_multiplier,
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            health_check: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Delay before retrying after failed attempt number `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Option<u64> {
        compute_delay(
            self.strategy,
            attempt,
            self.initial_delay_ms,
            self.backoff_multiplier,
            self.max_delay_ms,
        )
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl std::fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPolicy")
            .field("strategy", &self.strategy)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("health_check", &self.health_check.is_some())
            .finish()
    }
}

/// Backoff delay in milliseconds for a 1-based attempt number.
///
/// - exponential: `min(initial * multiplier^(attempt-1), max)`
/// - linear: `min(initial * attempt, max)`
/// - immediate: `0`
/// - manual: `None`, nothing is ever scheduled
///
/// Attempt 0 is treated as attempt 1.
pub fn compute_delay(
    strategy: RecoveryStrategy,
    attempt: u32,
    initial_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
) -> Option<u64> {
    let attempt = attempt.max(1);
    match strategy {
        RecoveryStrategy::ExponentialBackoff => {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            let raw = initial_delay_ms as f64 * multiplier.powi(exponent);
            if raw.is_nan() || raw >= max_delay_ms as f64 {
                Some(max_delay_ms)
            } else {
                Some(raw as u64)
            }
        }
        RecoveryStrategy::LinearBackoff => Some(
            initial_delay_ms
                .saturating_mul(u64::from(attempt))
                .min(max_delay_ms),
        ),
        RecoveryStrategy::Immediate => Some(0),
        RecoveryStrategy::Manual => None,
    }
}
