//! Chaos scenario definitions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ResilienceError, ResilienceResult};

/// Kind of injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChaosType {
    Latency,
    Error,
    CircuitBreaker,
    ResourceExhaustion,
    NetworkPartition,
    Timeout,
}

impl std::fmt::Display for ChaosType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChaosType::Latency => "LATENCY",
            ChaosType::Error => "ERROR",
            ChaosType::CircuitBreaker => "CIRCUIT_BREAKER",
            ChaosType::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            ChaosType::NetworkPartition => "NETWORK_PARTITION",
            ChaosType::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Fault type together with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fault {
    /// Delay every call to the target.
    Latency { delay_ms: u64 },

    /// Fail a fraction of calls.
    Error { error_rate: f64, error_type: String },

    /// Hold the target's circuit breaker open.
    CircuitBreaker,

    /// Reject calls with probability `level` as if `resource` ran out.
    ResourceExhaustion { resource: String, level: f64 },

    /// Reject every call.
    NetworkPartition,

    /// Stall for `timeout_ms`, then fail.
    Timeout { timeout_ms: u64 },
}

impl Fault {
    pub fn chaos_type(&self) -> ChaosType {
        match self {
            Fault::Latency { .. } => ChaosType::Latency,
            Fault::Error { .. } => ChaosType::Error,
            Fault::CircuitBreaker => ChaosType::CircuitBreaker,
            Fault::ResourceExhaustion { .. } => ChaosType::ResourceExhaustion,
            Fault::NetworkPartition => ChaosType::NetworkPartition,
            Fault::Timeout { .. } => ChaosType::Timeout,
        }
    }

    fn validate(&self) -> ResilienceResult<()> {
        let in_unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ResilienceError::InvalidScenario(format!(
                    "{name} must be within [0, 1], got {value}"
                )))
            }
        };
        match self {
            Fault::Error { error_rate, .. } => in_unit("error_rate", *error_rate),
            Fault::ResourceExhaustion { level, .. } => in_unit("level", *level),
            _ => Ok(()),
        }
    }
}

/// A bounded fault injection against a set of components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosScenario {
    pub scenario_id: Uuid,
    pub name: String,
    pub target: String,
    pub fault: Fault,
    pub duration_s: f64,
    pub max_duration_s: f64,

    /// Components affected; always includes `target`.
    pub blast_radius: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ChaosScenario {
    /// Build and validate a scenario. `blast_radius` defaults to the target.
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        fault: Fault,
        duration_s: f64,
        max_duration_s: f64,
        blast_radius: Option<BTreeSet<String>>,
    ) -> ResilienceResult<Self> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(ResilienceError::InvalidScenario(
                "target must not be empty".into(),
            ));
        }
        if !duration_s.is_finite() || duration_s <= 0.0 {
            return Err(ResilienceError::InvalidScenario(format!(
                "duration_s must be positive, got {duration_s}"
            )));
        }
        if duration_s > max_duration_s {
            return Err(ResilienceError::DurationExceeded {
                requested_s: duration_s,
                max_s: max_duration_s,
            });
        }
        fault.validate()?;

        let mut blast_radius = blast_radius.unwrap_or_default();
        blast_radius.insert(target.clone());

        let out_of_range = || {
            ResilienceError::InvalidScenario(format!("duration_s {duration_s} is out of range"))
        };
        let lifetime = std::time::Duration::try_from_secs_f64(duration_s)
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .ok_or_else(out_of_range)?;
        let started_at = Utc::now();
        let expires_at = started_at
            .checked_add_signed(lifetime)
            .ok_or_else(out_of_range)?;

        Ok(Self {
            scenario_id: Uuid::new_v4(),
            name: name.into(),
            target,
            fault,
            duration_s,
            max_duration_s,
            blast_radius,
            started_at,
            expires_at,
        })
    }

    pub fn chaos_type(&self) -> ChaosType {
        self.fault.chaos_type()
    }

    pub fn affects(&self, component: &str) -> bool {
        self.blast_radius.contains(component)
    }

    /// Scenario lifetime. Zero if `duration_s` was edited to a value that
    /// no longer converts.
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.duration_s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ceiling_is_enforced() {
        let err = ChaosScenario::new(
            "slow-registry",
            "policy_registry",
            Fault::Latency { delay_ms: 50 },
            600.0,
            300.0,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ResilienceError::DurationExceeded { .. }));
    }

    #[test]
    fn unrepresentable_durations_are_rejected() {
        for duration_s in [1e25, 1e15, f64::NAN, f64::INFINITY] {
            let result = ChaosScenario::new(
                "forever",
                "policy_engine",
                Fault::Latency { delay_ms: 50 },
                duration_s,
                1e30,
                None,
            );
            assert!(
                matches!(result, Err(ResilienceError::InvalidScenario(_))),
                "{duration_s} accepted"
            );
        }
    }

    #[test]
    fn blast_radius_always_contains_target() {
        let scenario = ChaosScenario::new(
            "partition",
            "message_bus",
            Fault::NetworkPartition,
            10.0,
            300.0,
            Some(BTreeSet::from(["agent-a".to_string()])),
        )
        .unwrap();
        assert!(scenario.affects("message_bus"));
        assert!(scenario.affects("agent-a"));
        assert!(!scenario.affects("agent-b"));
        assert_eq!(scenario.chaos_type(), ChaosType::NetworkPartition);
    }

    #[test]
    fn error_rate_outside_unit_interval_is_rejected() {
        let result = ChaosScenario::new(
            "errors",
            "policy_engine",
            Fault::Error {
                error_rate: 1.5,
                error_type: "internal".into(),
            },
            10.0,
            300.0,
            None,
        );
        assert!(matches!(result, Err(ResilienceError::InvalidScenario(_))));
    }
}
