//! Recovery orchestration.

mod hook;
mod orchestrator;
mod state;
mod strategy;

pub use hook::AutoRecoveryHook;
pub use orchestrator::RecoveryOrchestrator;
pub use state::{RecoveryEvent, RecoveryState, RecoveryStatus};
pub use strategy::{compute_delay, HealthCheck, RecoveryPolicy, RecoveryStrategy};
