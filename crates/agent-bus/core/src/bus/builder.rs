//! Builder for [`MessageBus`].
//!
//! Collaborators the configured validation strategy needs must be supplied;
//! the rest default to the in-memory mocks.

use std::sync::Arc;

use agent_bus_resilience::{ChaosEngine, HealthAggregator, RecoveryOrchestrator};
use agent_bus_types::{BusError, BusResult};

use super::handler::HandlerTable;
use super::{Collaborators, MessageBus};
use crate::collaborators::{AuditSink, DeliberationQueue, ImpactScorer, PolicyEngine, PolicyRegistry};
use crate::config::BusConfig;
use crate::deliberation::DeliberationTracker;
use crate::dependencies::DependencyBreakers;
use crate::metrics::BusMetrics;
use crate::mocks::{MemoryAuditSink, MockDeliberationQueue, MockImpactScorer};
use crate::registry::AgentRegistry;
use crate::validation::{
    AcceleratedStrategy, CompositeStrategy, DynamicPolicyStrategy, PolicyEngineStrategy,
    StaticHashStrategy, StrategyKind, ValidationStrategy,
};

/// Decided deliberations kept for `deliberation_outcome` lookups.
const RETAINED_DELIBERATIONS: usize = 10_000;

pub struct MessageBusBuilder {
    config: BusConfig,
    impact_scorer: Option<Arc<dyn ImpactScorer>>,
    deliberation_queue: Option<Arc<dyn DeliberationQueue>>,
    policy_engine: Option<Arc<dyn PolicyEngine>>,
    policy_registry: Option<Arc<dyn PolicyRegistry>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    strategy: Option<ValidationStrategy>,
}

impl MessageBusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            impact_scorer: None,
            deliberation_queue: None,
            policy_engine: None,
            policy_registry: None,
            audit_sink: None,
            strategy: None,
        }
    }

    pub fn with_impact_scorer(mut self, scorer: Arc<dyn ImpactScorer>) -> Self {
        self.impact_scorer = Some(scorer);
        self
    }

    pub fn with_deliberation_queue(mut self, queue: Arc<dyn DeliberationQueue>) -> Self {
        self.deliberation_queue = Some(queue);
        self
    }

    /// Required by the `external_policy_engine` strategy.
    pub fn with_policy_engine(mut self, engine: Arc<dyn PolicyEngine>) -> Self {
        self.policy_engine = Some(engine);
        self
    }

    /// Required by the `dynamic_policy` strategy.
    pub fn with_policy_registry(mut self, registry: Arc<dyn PolicyRegistry>) -> Self {
        self.policy_registry = Some(registry);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Use this strategy instead of the one named in the configuration.
    pub fn with_validation_strategy(mut self, strategy: ValidationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> BusResult<MessageBus> {
        self.config.validate()?;

        let breakers = DependencyBreakers::new(&self.config.circuit_breaker);
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => build_strategy(
                &self.config,
                self.config.validation.strategy,
                self.policy_engine.as_ref(),
                self.policy_registry.as_ref(),
                &breakers,
            )?,
        };

        let metrics = BusMetrics::new().map_err(|e| BusError::config("metrics", e.to_string()))?;

        let collaborators = Collaborators {
            impact_scorer: self
                .impact_scorer
                .unwrap_or_else(|| Arc::new(MockImpactScorer::default())),
            deliberation_queue: self
                .deliberation_queue
                .unwrap_or_else(|| Arc::new(MockDeliberationQueue::approve_all())),
            policy_engine: self.policy_engine,
            policy_registry: self.policy_registry,
            audit_sink: self
                .audit_sink
                .unwrap_or_else(|| Arc::new(MemoryAuditSink::new())),
        };

        Ok(MessageBus {
            health: Arc::new(HealthAggregator::new(self.config.health.clone())),
            recovery: Arc::new(RecoveryOrchestrator::new(self.config.recovery.clone())),
            chaos: Arc::new(ChaosEngine::new(self.config.chaos.clone())),
            strategy: Arc::new(strategy),
            collaborators,
            breakers,
            registry: Arc::new(AgentRegistry::new()),
            handlers: Arc::new(HandlerTable::default()),
            deliberations: Arc::new(DeliberationTracker::new(RETAINED_DELIBERATIONS)),
            metrics: Arc::new(metrics),
            runtime: parking_lot::RwLock::new(None),
            hook_installed: std::sync::atomic::AtomicBool::new(false),
            config: self.config,
        })
    }
}

fn build_strategy(
    config: &BusConfig,
    kind: StrategyKind,
    policy_engine: Option<&Arc<dyn PolicyEngine>>,
    policy_registry: Option<&Arc<dyn PolicyRegistry>>,
    breakers: &DependencyBreakers,
) -> BusResult<ValidationStrategy> {
    let hash = config.constitutional_hash.as_str();
    let strategy = match kind {
        StrategyKind::Static => ValidationStrategy::Static(StaticHashStrategy::new(hash)),
        StrategyKind::Accelerated => ValidationStrategy::Accelerated(AcceleratedStrategy::new(hash)),
        StrategyKind::DynamicPolicy => {
            let registry = policy_registry.ok_or_else(|| {
                BusError::config("policy_registry", "required by the dynamic_policy strategy")
            })?;
            ValidationStrategy::DynamicPolicy(
                DynamicPolicyStrategy::new(registry.clone(), breakers.policy_registry.clone(), hash)
                    .fail_closed(config.policy_fail_closed)
                    .on_unreachable(config.registry_unreachable_fallback)
                    .on_error(config.registry_error_policy),
            )
        }
        StrategyKind::ExternalPolicyEngine => {
            let engine = policy_engine.ok_or_else(|| {
                BusError::config("policy_engine", "required by the external_policy_engine strategy")
            })?;
            ValidationStrategy::ExternalPolicyEngine(PolicyEngineStrategy::new(
                engine.clone(),
                breakers.policy_engine.clone(),
                hash,
                config.validation.policy_path.clone(),
            ))
        }
        StrategyKind::Composite => {
            let members = config
                .validation
                .composite
                .iter()
                .map(|member| build_strategy(config, *member, policy_engine, policy_registry, breakers))
                .collect::<BusResult<Vec<_>>>()?;
            ValidationStrategy::Composite(
                CompositeStrategy::new(members, config.validation.composite_mode, hash)
                    .fail_closed(config.policy_fail_closed),
            )
        }
    };
    Ok(strategy)
}
