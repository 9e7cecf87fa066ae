//! Error types for the resilience layer.

use thiserror::Error;

/// Errors raised by breakers, health aggregation, recovery and chaos.
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("circuit breaker not found: {0}")]
    BreakerNotFound(String),

    /// Background loop already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// No active recovery to act on. Non-fatal.
    #[error("no active recovery for service {0}")]
    RecoveryNotActive(String),

    #[error("recovery already active for service {0}")]
    RecoveryAlreadyActive(String),

    #[error("recovery attempt already in progress for service {0}")]
    RecoveryInProgress(String),

    #[error("service {0} is not awaiting manual recovery")]
    NotAwaitingManual(String),

    #[error("chaos injection is disabled")]
    ChaosDisabled,

    #[error("emergency stop is active; injection refused until reset")]
    EmergencyStopActive,

    #[error("scenario duration {requested_s}s exceeds ceiling of {max_s}s")]
    DurationExceeded { requested_s: f64, max_s: f64 },

    #[error("invalid chaos scenario: {0}")]
    InvalidScenario(String),

    /// A fault deliberately injected into the named target.
    #[error("injected {fault} fault on {target}")]
    InjectedFault { target: String, fault: String },

    /// Listener reported failure. Counted, never propagated to callers.
    #[error("health listener failed: {0}")]
    Listener(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
