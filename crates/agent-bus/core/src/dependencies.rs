//! Circuit breakers guarding the external collaborators.

use std::future::Future;
use std::sync::Arc;

use agent_bus_resilience::{CircuitBreaker, CircuitBreakerConfig, HealthCheck};
use agent_bus_types::{BusError, BusResult};
use async_trait::async_trait;
use tracing::warn;

use crate::collaborators::{DeliberationQueue, ImpactScorer, PolicyEngine, PolicyRegistry};

pub const POLICY_ENGINE: &str = "policy_engine";
pub const POLICY_REGISTRY: &str = "policy_registry";
pub const IMPACT_SCORER: &str = "impact_scorer";
pub const DELIBERATION: &str = "deliberation";

/// One breaker per collaborator, shared with health, recovery and chaos.
#[derive(Debug, Clone)]
pub struct DependencyBreakers {
    pub policy_engine: Arc<CircuitBreaker>,
    pub policy_registry: Arc<CircuitBreaker>,
    pub impact_scorer: Arc<CircuitBreaker>,
    pub deliberation: Arc<CircuitBreaker>,
}

impl DependencyBreakers {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        let breaker = |name: &str| Arc::new(CircuitBreaker::new(name, config.clone()));
        Self {
            policy_engine: breaker(POLICY_ENGINE),
            policy_registry: breaker(POLICY_REGISTRY),
            impact_scorer: breaker(IMPACT_SCORER),
            deliberation: breaker(DELIBERATION),
        }
    }

    /// Breakers with their names, in a stable order.
    pub fn all(&self) -> [(&'static str, &Arc<CircuitBreaker>); 4] {
        [
            (POLICY_ENGINE, &self.policy_engine),
            (POLICY_REGISTRY, &self.policy_registry),
            (IMPACT_SCORER, &self.impact_scorer),
            (DELIBERATION, &self.deliberation),
        ]
    }
}

/// Run `call` through `breaker`.
///
/// An open breaker short-circuits to `DependencyUnavailable`. Only
/// unavailability counts as a breaker failure; any other answer, error or
/// not, proves the dependency is reachable. A call dropped before it
/// answers records nothing and frees its half-open slot.
pub async fn guarded<T, F>(breaker: &CircuitBreaker, call: F) -> BusResult<T>
where
    F: Future<Output = BusResult<T>>,
{
    let Some(permit) = breaker.try_acquire() else {
        return Err(BusError::DependencyUnavailable {
            dependency: breaker.name().to_string(),
        });
    };

    match call.await {
        Ok(value) => {
            permit.success();
            Ok(value)
        }
        Err(e) if e.is_unavailability() => {
            permit.failure();
            warn!(dependency = breaker.name(), error = %e, "Dependency call failed");
            Err(e)
        }
        Err(e) => {
            permit.success();
            Err(e)
        }
    }
}

/// Health probe for a collaborator, used as a recovery health check.
pub enum DependencyProbe {
    PolicyEngine(Arc<dyn PolicyEngine>),
    PolicyRegistry(Arc<dyn PolicyRegistry>),
    ImpactScorer(Arc<dyn ImpactScorer>),
    Deliberation(Arc<dyn DeliberationQueue>),
}

#[async_trait]
impl HealthCheck for DependencyProbe {
    async fn check(&self) -> bool {
        match self {
            DependencyProbe::PolicyEngine(engine) => engine.health_check().await,
            DependencyProbe::PolicyRegistry(registry) => registry.health_check().await,
            DependencyProbe::ImpactScorer(scorer) => scorer.health_check().await,
            DependencyProbe::Deliberation(queue) => queue.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_bus_resilience::CircuitState;

    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            POLICY_ENGINE,
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    fn unreachable() -> BusResult<()> {
        Err(BusError::PolicyEngineUnavailable {
            engine: "opa".into(),
            reason: "refused".into(),
        })
    }

    #[tokio::test]
    async fn unavailability_opens_breaker() {
        let breaker = breaker();
        assert!(guarded(&breaker, async { unreachable() }).await.is_err());
        assert!(guarded(&breaker, async { unreachable() }).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = guarded(&breaker, async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, BusError::DependencyUnavailable { dependency } if dependency == POLICY_ENGINE));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_half_open_call_frees_its_slot() {
        let breaker = CircuitBreaker::new(
            POLICY_ENGINE,
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                reset_timeout_ms: 10,
                half_open_max_requests: 1,
            },
        );
        assert!(guarded(&breaker, async { unreachable() }).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            guarded(&breaker, std::future::pending::<BusResult<()>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(guarded(&breaker, async { Ok(()) }).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn answered_errors_do_not_trip() {
        let breaker = breaker();
        for _ in 0..5 {
            let result: BusResult<()> =
                guarded(&breaker, async { Err(BusError::PolicyNotFound("p".into())) }).await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
