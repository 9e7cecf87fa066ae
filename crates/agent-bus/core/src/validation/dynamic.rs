use std::sync::Arc;

use agent_bus_resilience::CircuitBreaker;
use agent_bus_types::{BusResult, Message, ValidationResult};
use tracing::warn;

use super::{hash_mismatch, StaticHashStrategy, StrategyKind};
use crate::collaborators::PolicyRegistry;
use crate::config::RegistryFallback;
use crate::dependencies::guarded;

/// Checks the message hash against the hash the policy registry has in
/// force for the message's tenant.
///
/// Registry failures resolve in this order:
/// 1. `fail_closed` set: the failure is returned.
/// 2. Registry unreachable (or its breaker open): `on_unreachable`.
/// 3. Registry answered with an error: `on_error`.
///
/// A `StaticHash` fallback validates against the configured hash and adds
/// a warning; `Deny` returns the failure.
pub struct DynamicPolicyStrategy {
    registry: Arc<dyn PolicyRegistry>,
    breaker: Arc<CircuitBreaker>,
    fallback: StaticHashStrategy,
    fail_closed: bool,
    on_unreachable: RegistryFallback,
    on_error: RegistryFallback,
}

impl DynamicPolicyStrategy {
    pub fn new(
        registry: Arc<dyn PolicyRegistry>,
        breaker: Arc<CircuitBreaker>,
        static_hash: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            breaker,
            fallback: StaticHashStrategy::new(static_hash),
            fail_closed: false,
            on_unreachable: RegistryFallback::StaticHash,
            on_error: RegistryFallback::Deny,
        }
    }

    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    pub fn on_unreachable(mut self, fallback: RegistryFallback) -> Self {
        self.on_unreachable = fallback;
        self
    }

    pub fn on_error(mut self, fallback: RegistryFallback) -> Self {
        self.on_error = fallback;
        self
    }

    pub async fn validate(&self, message: &Message) -> BusResult<ValidationResult> {
        let lookup = guarded(&self.breaker, self.registry.active_hash(&message.tenant_id)).await;

        let error = match lookup {
            Ok(active) => {
                return Ok(if message.constitutional_hash == active {
                    ValidationResult::valid(message.constitutional_hash.clone())
                        .with_metadata("strategy", StrategyKind::DynamicPolicy.as_str().into())
                } else {
                    hash_mismatch(message, &active, StrategyKind::DynamicPolicy)
                });
            }
            Err(e) => e,
        };

        if self.fail_closed {
            return Err(error);
        }

        let fallback = if error.is_unavailability() {
            self.on_unreachable
        } else {
            self.on_error
        };

        match fallback {
            RegistryFallback::Deny => Err(error),
            RegistryFallback::StaticHash => {
                warn!(
                    message_id = %message.message_id,
                    tenant_id = %message.tenant_id,
                    error = %error,
                    "Policy registry unusable; validating against static hash"
                );
                Ok(self
                    .fallback
                    .validate(message)
                    .with_warning(format!("policy registry unusable ({error}); static hash applied")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_bus_resilience::CircuitBreakerConfig;
    use agent_bus_types::BusError;

    use super::*;
    use crate::mocks::MockPolicyRegistry;
    use crate::validation::testing::{message_with_hash, HASH};

    const ROTATED: &str = "0a1b2c3d4e5f6071";

    fn strategy(registry: Arc<MockPolicyRegistry>) -> DynamicPolicyStrategy {
        DynamicPolicyStrategy::new(
            registry,
            Arc::new(CircuitBreaker::new("policy_registry", CircuitBreakerConfig::default())),
            HASH,
        )
    }

    #[tokio::test]
    async fn registry_hash_overrides_static_hash() {
        let registry = Arc::new(MockPolicyRegistry::with_hash(ROTATED));
        let strategy = strategy(registry);

        assert!(strategy.validate(&message_with_hash(ROTATED)).await.unwrap().is_valid());
        assert!(!strategy.validate(&message_with_hash(HASH)).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn unreachable_registry_falls_back_with_warning() {
        let registry = Arc::new(MockPolicyRegistry::with_hash(ROTATED));
        registry.set_unreachable();
        let strategy = strategy(registry);

        let result = strategy.validate(&message_with_hash(HASH)).await.unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
    }

    #[tokio::test]
    async fn fail_closed_propagates_unavailability() {
        let registry = Arc::new(MockPolicyRegistry::with_hash(ROTATED));
        registry.set_unreachable();
        let strategy = strategy(registry).fail_closed(true);

        let err = strategy.validate(&message_with_hash(HASH)).await.unwrap_err();
        assert!(err.is_unavailability());
    }

    #[tokio::test]
    async fn registry_errors_deny_by_default() {
        let registry = Arc::new(MockPolicyRegistry::with_hash(ROTATED));
        registry.set_erroring("bundle signature invalid");
        let strict = strategy(registry.clone());

        let err = strict.validate(&message_with_hash(HASH)).await.unwrap_err();
        assert!(matches!(err, BusError::PolicyEvaluation(_)));

        let lenient = strategy(registry).on_error(RegistryFallback::StaticHash);
        assert!(lenient.validate(&message_with_hash(HASH)).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn deny_on_unreachable_is_honoured() {
        let registry = Arc::new(MockPolicyRegistry::with_hash(ROTATED));
        registry.set_unreachable();
        let strategy = strategy(registry).on_unreachable(RegistryFallback::Deny);
        assert!(strategy.validate(&message_with_hash(HASH)).await.is_err());
    }
}
