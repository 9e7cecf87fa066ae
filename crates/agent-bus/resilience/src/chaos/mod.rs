//! Chaos engineering: bounded fault injection with emergency stop.

mod engine;
mod scenario;

pub use engine::ChaosEngine;
pub use scenario::{ChaosScenario, ChaosType, Fault};
