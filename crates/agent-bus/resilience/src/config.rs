//! Resilience configuration.
//!
//! Durations are carried as integer milliseconds (or fractional seconds for
//! chaos scenarios) so the structs load cleanly from files and environment
//! variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResilienceError, ResilienceResult};
use crate::recovery::RecoveryStrategy;

/// Circuit breaker thresholds shared by every dependency breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,

    /// Time spent open before probing in half-open.
    pub reset_timeout_ms: u64,

    /// Requests let through while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "circuit_breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "circuit_breaker.success_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Health aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Poll interval of the aggregation loop.
    pub check_interval_ms: u64,

    /// How far back the snapshot history reaches.
    pub history_window_minutes: u64,

    /// Scores at or above this are HEALTHY.
    pub degraded_threshold: f64,

    /// Scores at or above this (and below `degraded_threshold`) are DEGRADED;
    /// anything lower is CRITICAL.
    pub critical_threshold: f64,

    /// Bound of the notification channel between the poll loop and the
    /// callback drain task.
    pub callback_channel_capacity: usize,

    /// Notifications a single listener may have in flight. Further ones
    /// are dropped for that listener until it catches up.
    pub listener_max_in_flight: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1_000,
            history_window_minutes: 5,
            degraded_threshold: 0.7,
            critical_threshold: 0.5,
            callback_channel_capacity: 256,
            listener_max_in_flight: 4,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Ring buffer capacity: history window times sample rate.
    pub fn history_capacity(&self) -> usize {
        let window_ms = self.history_window_minutes.saturating_mul(60_000);
        let samples = window_ms / self.check_interval_ms.max(1);
        usize::try_from(samples).unwrap_or(usize::MAX).max(1)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.check_interval_ms == 0 {
            return Err(ResilienceError::Configuration(
                "health.check_interval_ms must be positive".into(),
            ));
        }
        for (key, value) in [
            ("health.degraded_threshold", self.degraded_threshold),
            ("health.critical_threshold", self.critical_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResilienceError::Configuration(format!(
                    "{key} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.critical_threshold > self.degraded_threshold {
            return Err(ResilienceError::Configuration(
                "health.critical_threshold must not exceed health.degraded_threshold".into(),
            ));
        }
        if self.callback_channel_capacity == 0 {
            return Err(ResilienceError::Configuration(
                "health.callback_channel_capacity must be positive".into(),
            ));
        }
        if self.listener_max_in_flight == 0 {
            return Err(ResilienceError::Configuration(
                "health.listener_max_in_flight must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults applied to services scheduled without an explicit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub default_strategy: RecoveryStrategy,
    pub max_retry_attempts: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,

    /// How often the scheduling loop looks for due attempts.
    pub tick_interval_ms: u64,

    /// Upper bound on a single health check.
    pub health_check_timeout_ms: u64,

    /// Priority used by the automatic recovery hook.
    pub default_priority: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_strategy: RecoveryStrategy::ExponentialBackoff,
            max_retry_attempts: 5,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            tick_interval_ms: 100,
            health_check_timeout_ms: 5_000,
            default_priority: 5,
        }
    }
}

impl RecoveryConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_retry_attempts == 0 {
            return Err(ResilienceError::Configuration(
                "recovery.max_retry_attempts must be positive".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::Configuration(
                "recovery.backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ResilienceError::Configuration(
                "recovery.initial_delay_ms must not exceed recovery.max_delay_ms".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ResilienceError::Configuration(
                "recovery.tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Fault injection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Whether injection is permitted at all.
    pub enabled: bool,

    /// Hard ceiling on any scenario's duration.
    pub max_duration_s: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration_s: 300.0,
        }
    }
}

impl ChaosConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        if !self.max_duration_s.is_finite() || self.max_duration_s <= 0.0 {
            return Err(ResilienceError::Configuration(
                "chaos.max_duration_s must be a positive number".into(),
            ));
        }
        Ok(())
    }
}
