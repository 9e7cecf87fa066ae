//! Constitutional validation strategies.
//!
//! A closed set of variants behind one `validate` entry point, chosen when
//! the bus is built. Composite holds further strategies, so chains nest
//! without any trait objects.

mod accelerated;
mod composite;
mod dynamic;
mod policy_engine;
mod static_hash;

use agent_bus_types::{sanitize_hash, BusResult, Message, ValidationResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

pub use accelerated::AcceleratedStrategy;
pub use composite::{CompositeMode, CompositeStrategy};
pub use dynamic::DynamicPolicyStrategy;
pub use policy_engine::PolicyEngineStrategy;
pub use static_hash::StaticHashStrategy;

/// Metadata key naming why a verdict failed.
pub const FAILURE_KEY: &str = "failure";
/// `FAILURE_KEY` value for a hash that does not match.
pub const HASH_MISMATCH: &str = "constitutional_hash_mismatch";
/// Metadata key carrying the hash the message was checked against.
pub const EXPECTED_HASH_KEY: &str = "expected_hash";

/// Strategy selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Static,
    DynamicPolicy,
    ExternalPolicyEngine,
    Accelerated,
    Composite,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Static => "static",
            StrategyKind::DynamicPolicy => "dynamic_policy",
            StrategyKind::ExternalPolicyEngine => "external_policy_engine",
            StrategyKind::Accelerated => "accelerated",
            StrategyKind::Composite => "composite",
        }
    }
}

/// A configured validation strategy.
pub enum ValidationStrategy {
    Static(StaticHashStrategy),
    DynamicPolicy(DynamicPolicyStrategy),
    ExternalPolicyEngine(PolicyEngineStrategy),
    Accelerated(AcceleratedStrategy),
    Composite(CompositeStrategy),
}

impl ValidationStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ValidationStrategy::Static(_) => StrategyKind::Static,
            ValidationStrategy::DynamicPolicy(_) => StrategyKind::DynamicPolicy,
            ValidationStrategy::ExternalPolicyEngine(_) => StrategyKind::ExternalPolicyEngine,
            ValidationStrategy::Accelerated(_) => StrategyKind::Accelerated,
            ValidationStrategy::Composite(_) => StrategyKind::Composite,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Validate one message.
    ///
    /// `Ok` carries the verdict, valid or not. `Err` means no verdict could
    /// be reached, e.g. a collaborator was unreachable; callers must treat
    /// that as a denial.
    pub fn validate<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, BusResult<ValidationResult>> {
        match self {
            ValidationStrategy::Static(s) => {
                let result = s.validate(message);
                async move { Ok(result) }.boxed()
            }
            ValidationStrategy::Accelerated(s) => {
                let result = s.validate(message);
                async move { Ok(result) }.boxed()
            }
            ValidationStrategy::DynamicPolicy(s) => s.validate(message).boxed(),
            ValidationStrategy::ExternalPolicyEngine(s) => s.validate(message).boxed(),
            ValidationStrategy::Composite(s) => s.validate(message).boxed(),
        }
    }
}

impl std::fmt::Debug for ValidationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStrategy::Composite(c) => f
                .debug_struct("Composite")
                .field("mode", &c.mode())
                .field("members", &c.members().iter().map(|m| m.name()).collect::<Vec<_>>())
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Failing verdict for a hash that does not match `expected`.
pub(crate) fn hash_mismatch(message: &Message, expected: &str, strategy: StrategyKind) -> ValidationResult {
    ValidationResult::invalid(
        message.constitutional_hash.clone(),
        vec![format!(
            "constitutional hash mismatch: expected {expected}, received {}",
            sanitize_hash(&message.constitutional_hash)
        )],
    )
    .with_metadata(FAILURE_KEY, HASH_MISMATCH.into())
    .with_metadata(EXPECTED_HASH_KEY, expected.into())
    .with_metadata("strategy", strategy.as_str().into())
}

/// Whether a failing verdict was caused by a hash mismatch, and against
/// which expected hash.
pub fn mismatched_hash(result: &ValidationResult) -> Option<&str> {
    if result.is_valid() {
        return None;
    }
    let failure = result.metadata().get(FAILURE_KEY)?.as_str()?;
    if failure != HASH_MISMATCH {
        return None;
    }
    result.metadata().get(EXPECTED_HASH_KEY)?.as_str()
}
