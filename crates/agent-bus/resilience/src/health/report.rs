//! Health scores, statuses and snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;
use crate::config::HealthConfig;

/// Overall system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemHealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// No poll has completed yet, or there is nothing to score.
    #[default]
    Unknown,
}

impl SystemHealthStatus {
    pub fn is_impaired(&self) -> bool {
        matches!(self, SystemHealthStatus::Degraded | SystemHealthStatus::Critical)
    }
}

impl std::fmt::Display for SystemHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemHealthStatus::Healthy => write!(f, "HEALTHY"),
            SystemHealthStatus::Degraded => write!(f, "DEGRADED"),
            SystemHealthStatus::Critical => write!(f, "CRITICAL"),
            SystemHealthStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Weighted breaker score: closed counts 1.0, half-open 0.5, open 0.0.
///
/// Returns `None` when there are no breakers.
pub fn compute_health_score(closed: usize, half_open: usize, open: usize) -> Option<f64> {
    let total = closed + half_open + open;
    if total == 0 {
        return None;
    }
    let weighted = closed as f64 * 1.0 + half_open as f64 * 0.5 + open as f64 * 0.0;
    Some(weighted / total as f64)
}

/// Map a score onto a status using the configured thresholds.
pub fn classify_health(score: Option<f64>, config: &HealthConfig) -> SystemHealthStatus {
    match score {
        None => SystemHealthStatus::Unknown,
        Some(s) if s >= config.degraded_threshold => SystemHealthStatus::Healthy,
        Some(s) if s >= config.critical_threshold => SystemHealthStatus::Degraded,
        Some(_) => SystemHealthStatus::Critical,
    }
}

/// One entry of the health history ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: SystemHealthStatus,
    pub health_score: Option<f64>,
    pub total_breakers: usize,
    pub closed_breakers: usize,
    pub half_open_breakers: usize,
    pub open_breakers: usize,
}

/// Full report of the most recent poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub timestamp: DateTime<Utc>,
    pub status: SystemHealthStatus,
    pub health_score: Option<f64>,
    pub total_breakers: usize,
    pub closed_breakers: usize,
    pub half_open_breakers: usize,
    pub open_breakers: usize,

    /// Breakers currently half-open.
    pub degraded_services: Vec<String>,

    /// Breakers currently open.
    pub critical_services: Vec<String>,

    pub circuit_breakers: BTreeMap<String, CircuitState>,
}

impl SystemHealthReport {
    /// Report before the first poll.
    pub fn unknown() -> Self {
        Self::from_states(BTreeMap::new(), &HealthConfig::default())
    }

    /// Score a set of breaker states.
    pub fn from_states(states: BTreeMap<String, CircuitState>, config: &HealthConfig) -> Self {
        let mut closed = 0;
        let mut degraded_services = Vec::new();
        let mut critical_services = Vec::new();

        for (name, state) in &states {
            match state {
                CircuitState::Closed => closed += 1,
                CircuitState::HalfOpen => degraded_services.push(name.clone()),
                CircuitState::Open => critical_services.push(name.clone()),
            }
        }

        let health_score =
            compute_health_score(closed, degraded_services.len(), critical_services.len());

        Self {
            timestamp: Utc::now(),
            status: classify_health(health_score, config),
            health_score,
            total_breakers: states.len(),
            closed_breakers: closed,
            half_open_breakers: degraded_services.len(),
            open_breakers: critical_services.len(),
            degraded_services,
            critical_services,
            circuit_breakers: states,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            timestamp: self.timestamp,
            status: self.status,
            health_score: self.health_score,
            total_breakers: self.total_breakers,
            closed_breakers: self.closed_breakers,
            half_open_breakers: self.half_open_breakers,
            open_breakers: self.open_breakers,
        }
    }
}
