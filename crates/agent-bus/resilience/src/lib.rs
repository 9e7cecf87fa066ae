//! Antifragility layer for the Agent Bus.
//!
//! Every external collaborator the bus talks to (policy engine, policy
//! registry, impact scorer, deliberation queue) sits behind a named
//! [`CircuitBreaker`]. This crate watches those breakers and reacts:
//!
//! - [`HealthAggregator`] polls breakers on a timer, scores system health,
//!   keeps a bounded history and notifies listeners without ever blocking
//!   the poll loop or a message caller.
//! - [`RecoveryOrchestrator`] drives degraded services through prioritised,
//!   backoff-spaced recovery attempts with at most one attempt in flight per
//!   service.
//! - [`ChaosEngine`] injects bounded, time-limited faults for resilience
//!   testing, with a global emergency stop.

pub mod chaos;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod recovery;

pub use chaos::{ChaosEngine, ChaosScenario, ChaosType, Fault};
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use config::{ChaosConfig, CircuitBreakerConfig, HealthConfig, RecoveryConfig};
pub use error::{ResilienceError, ResilienceResult};
pub use health::{
    classify_health, compute_health_score, DispatchStats, HealthAggregator,
    HealthChangeListener, HealthSnapshot, SystemHealthReport, SystemHealthStatus,
};
pub use recovery::{
    compute_delay, AutoRecoveryHook, HealthCheck, RecoveryEvent, RecoveryOrchestrator,
    RecoveryPolicy, RecoveryState, RecoveryStatus, RecoveryStrategy,
};
