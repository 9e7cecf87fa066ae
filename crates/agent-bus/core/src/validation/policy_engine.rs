use std::sync::Arc;

use agent_bus_resilience::CircuitBreaker;
use agent_bus_types::{BusResult, Message, ValidationResult};
use serde_json::json;
use tracing::debug;

use super::{StaticHashStrategy, StrategyKind};
use crate::collaborators::PolicyEngine;
use crate::dependencies::guarded;

/// Static hash check followed by an external policy decision.
///
/// Engine unreachability is always returned as an error; there is no
/// fallback that could turn an unanswered query into an allow.
pub struct PolicyEngineStrategy {
    engine: Arc<dyn PolicyEngine>,
    breaker: Arc<CircuitBreaker>,
    hash_check: StaticHashStrategy,
    policy_path: String,
}

impl PolicyEngineStrategy {
    pub fn new(
        engine: Arc<dyn PolicyEngine>,
        breaker: Arc<CircuitBreaker>,
        expected_hash: impl Into<String>,
        policy_path: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            breaker,
            hash_check: StaticHashStrategy::new(expected_hash),
            policy_path: policy_path.into(),
        }
    }

    pub fn policy_path(&self) -> &str {
        &self.policy_path
    }

    pub async fn validate(&self, message: &Message) -> BusResult<ValidationResult> {
        let hashed = self.hash_check.validate(message);
        if !hashed.is_valid() {
            return Ok(hashed);
        }

        let input = policy_input(message);
        let decision = guarded(&self.breaker, self.engine.evaluate(&self.policy_path, &input)).await?;
        debug!(
            message_id = %message.message_id,
            engine = self.engine.name(),
            allow = decision.allow,
            "Policy evaluated"
        );

        let verdict = if decision.allow {
            ValidationResult::valid(message.constitutional_hash.clone())
        } else {
            let errors = if decision.errors.is_empty() {
                vec![format!("denied by policy {}", self.policy_path)]
            } else {
                decision.errors
            };
            ValidationResult::invalid(message.constitutional_hash.clone(), errors)
        };
        Ok(verdict
            .with_metadata("strategy", StrategyKind::ExternalPolicyEngine.as_str().into())
            .with_metadata("policy_path", self.policy_path.clone().into()))
    }
}

/// Document handed to the policy engine.
fn policy_input(message: &Message) -> serde_json::Value {
    json!({
        "message_id": message.message_id,
        "conversation_id": message.conversation_id,
        "from_agent": message.from_agent,
        "to_agent": message.to_agent,
        "tenant_id": message.tenant_id,
        "message_type": message.message_type,
        "priority": message.priority,
        "constitutional_hash": message.constitutional_hash,
        "payload": message.payload,
        "metadata": message.metadata,
    })
}

#[cfg(test)]
mod tests {
    use agent_bus_resilience::CircuitBreakerConfig;

    use super::*;
    use crate::mocks::MockPolicyEngine;
    use crate::validation::testing::{message_with_hash, HASH};

    fn strategy(engine: Arc<MockPolicyEngine>) -> PolicyEngineStrategy {
        PolicyEngineStrategy::new(
            engine,
            Arc::new(CircuitBreaker::new("policy_engine", CircuitBreakerConfig::default())),
            HASH,
            "agent_bus/constitutional/allow",
        )
    }

    #[tokio::test]
    async fn denial_carries_engine_errors() {
        let engine = Arc::new(MockPolicyEngine::deny_all(vec!["tenant suspended".into()]));
        let result = strategy(engine).validate(&message_with_hash(HASH)).await.unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.errors(), &["tenant suspended".to_string()]);
    }

    #[tokio::test]
    async fn hash_mismatch_skips_engine() {
        let engine = Arc::new(MockPolicyEngine::allow_all());
        let result = strategy(engine.clone())
            .validate(&message_with_hash("0000000000000000"))
            .await
            .unwrap();
        assert!(!result.is_valid());
        assert_eq!(engine.evaluations(), 0);
    }

    #[tokio::test]
    async fn unreachable_engine_never_allows() {
        let engine = Arc::new(MockPolicyEngine::unreachable());
        let err = strategy(engine).validate(&message_with_hash(HASH)).await.unwrap_err();
        assert_eq!(err.error_code(), "POLICY_ENGINE_UNAVAILABLE");
    }
}
