//! Per-service recovery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::RecoveryStrategy;

/// Recovery lifecycle of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    #[default]
    Idle,
    Scheduled,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    AwaitingManual,
}

impl RecoveryState {
    /// Scheduled, running or waiting on an operator.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecoveryState::Scheduled | RecoveryState::InProgress | RecoveryState::AwaitingManual
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryState::Succeeded | RecoveryState::Failed | RecoveryState::Cancelled
        )
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryState::Idle => "IDLE",
            RecoveryState::Scheduled => "SCHEDULED",
            RecoveryState::InProgress => "IN_PROGRESS",
            RecoveryState::Succeeded => "SUCCEEDED",
            RecoveryState::Failed => "FAILED",
            RecoveryState::Cancelled => "CANCELLED",
            RecoveryState::AwaitingManual => "AWAITING_MANUAL",
        };
        f.write_str(name)
    }
}

/// Externally visible recovery record for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub service_name: String,
    pub state: RecoveryState,
    pub strategy: RecoveryStrategy,

    /// Lower is served first.
    pub priority: u32,

    /// Failed attempts so far.
    pub attempt_count: u32,
    pub max_retry_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Events published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecoveryEvent {
    Scheduled { service: String, priority: u32 },
    AttemptStarted { service: String, attempt: u32 },
    AttemptFailed { service: String, attempt: u32, retry_in_ms: u64 },
    Succeeded { service: String, attempts: u32 },
    Failed { service: String, attempts: u32 },
    Cancelled { service: String },
    AwaitingManual { service: String },
}

impl RecoveryEvent {
    pub fn service(&self) -> &str {
        match self {
            RecoveryEvent::Scheduled { service, .. }
            | RecoveryEvent::AttemptStarted { service, .. }
            | RecoveryEvent::AttemptFailed { service, .. }
            | RecoveryEvent::Succeeded { service, .. }
            | RecoveryEvent::Failed { service, .. }
            | RecoveryEvent::Cancelled { service }
            | RecoveryEvent::AwaitingManual { service } => service,
        }
    }

    /// Short outcome label, used as a metrics dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            RecoveryEvent::Scheduled { .. } => "scheduled",
            RecoveryEvent::AttemptStarted { .. } => "started",
            RecoveryEvent::AttemptFailed { .. } => "retry",
            RecoveryEvent::Succeeded { .. } => "succeeded",
            RecoveryEvent::Failed { .. } => "failed",
            RecoveryEvent::Cancelled { .. } => "cancelled",
            RecoveryEvent::AwaitingManual { .. } => "awaiting_manual",
        }
    }
}
