//! In-memory collaborators for tests and local development.
//!
//! Every mock can be switched to "unreachable" at runtime so breaker and
//! recovery behaviour can be exercised without real infrastructure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use agent_bus_types::{BusError, BusResult, Message, TenantId};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::collaborators::{
    AuditRecord, AuditSink, DeliberationDecision, DeliberationQueue, ImpactScorer, MetricsEvent,
    PolicyDecision, PolicyEngine, PolicyRegistry,
};

/// Payload key read by [`MockImpactScorer::from_payload`].
pub const IMPACT_SCORE_KEY: &str = "impact_score";

/// Impact scorer returning a fixed score, or one carried in the payload.
pub struct MockImpactScorer {
    default_score: f64,
    read_payload: bool,
    unreachable: AtomicBool,
    calls: AtomicU64,
}

impl MockImpactScorer {
    pub fn fixed(score: f64) -> Self {
        Self {
            default_score: score,
            read_payload: false,
            unreachable: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Use `payload["impact_score"]` when present, `default_score` otherwise.
    pub fn from_payload(default_score: f64) -> Self {
        Self {
            read_payload: true,
            ..Self::fixed(default_score)
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockImpactScorer {
    fn default() -> Self {
        Self::fixed(0.1)
    }
}

#[async_trait]
impl ImpactScorer for MockImpactScorer {
    async fn score(&self, message: &Message) -> BusResult<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BusError::DependencyUnavailable {
                dependency: "impact_scorer".into(),
            });
        }
        let from_payload = self
            .read_payload
            .then(|| message.payload.get(IMPACT_SCORE_KEY))
            .flatten()
            .and_then(serde_json::Value::as_f64);
        Ok(from_payload.unwrap_or(self.default_score))
    }

    async fn health_check(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}

/// Deliberation queue with a canned decision and optional delay.
pub struct MockDeliberationQueue {
    decision: DeliberationDecision,
    delay: Duration,
    unreachable: AtomicBool,
    queued: AtomicU64,
}

impl MockDeliberationQueue {
    pub fn approve_all() -> Self {
        Self {
            decision: DeliberationDecision::Approved,
            delay: Duration::ZERO,
            unreachable: AtomicBool::new(false),
            queued: AtomicU64::new(0),
        }
    }

    pub fn reject_all(reason: impl Into<String>) -> Self {
        Self {
            decision: DeliberationDecision::Rejected {
                reason: reason.into(),
            },
            ..Self::approve_all()
        }
    }

    /// Decide only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::SeqCst)
    }
}

impl Default for MockDeliberationQueue {
    fn default() -> Self {
        Self::approve_all()
    }
}

#[async_trait]
impl DeliberationQueue for MockDeliberationQueue {
    async fn queue_for_deliberation(&self, _message: &Message) -> BusResult<DeliberationDecision> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BusError::DependencyUnavailable {
                dependency: "deliberation".into(),
            });
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.decision.clone())
    }

    async fn health_check(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}

/// Policy engine with a fixed decision.
pub struct MockPolicyEngine {
    decision: PolicyDecision,
    unreachable: AtomicBool,
    evaluations: AtomicU64,
}

impl MockPolicyEngine {
    pub fn allow_all() -> Self {
        Self {
            decision: PolicyDecision::allow(),
            unreachable: AtomicBool::new(false),
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn deny_all(errors: Vec<String>) -> Self {
        Self {
            decision: PolicyDecision::deny(errors),
            ..Self::allow_all()
        }
    }

    /// Engine that refuses connections until `set_unreachable(false)`.
    pub fn unreachable() -> Self {
        let engine = Self::allow_all();
        engine.set_unreachable(true);
        engine
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl Default for MockPolicyEngine {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[async_trait]
impl PolicyEngine for MockPolicyEngine {
    fn name(&self) -> &str {
        "mock-opa"
    }

    async fn evaluate(
        &self,
        _policy_path: &str,
        _input: &serde_json::Value,
    ) -> BusResult<PolicyDecision> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BusError::PolicyEngineUnavailable {
                engine: self.name().to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.decision.clone())
    }

    async fn health_check(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}

enum RegistryMode {
    Serving,
    Unreachable,
    Erroring(String),
}

/// Policy registry serving one hash for every tenant.
pub struct MockPolicyRegistry {
    active_hash: RwLock<String>,
    mode: RwLock<RegistryMode>,
}

impl MockPolicyRegistry {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            active_hash: RwLock::new(hash.into()),
            mode: RwLock::new(RegistryMode::Serving),
        }
    }

    /// Rotate the active hash.
    pub fn set_hash(&self, hash: impl Into<String>) {
        *self.active_hash.write() = hash.into();
    }

    pub fn set_unreachable(&self) {
        *self.mode.write() = RegistryMode::Unreachable;
    }

    /// Answer every lookup with an evaluation error.
    pub fn set_erroring(&self, reason: impl Into<String>) {
        *self.mode.write() = RegistryMode::Erroring(reason.into());
    }

    pub fn set_serving(&self) {
        *self.mode.write() = RegistryMode::Serving;
    }
}

#[async_trait]
impl PolicyRegistry for MockPolicyRegistry {
    async fn active_hash(&self, _tenant_id: &TenantId) -> BusResult<String> {
        match &*self.mode.read() {
            RegistryMode::Serving => Ok(self.active_hash.read().clone()),
            RegistryMode::Unreachable => Err(BusError::PolicyEngineUnavailable {
                engine: "policy_registry".into(),
                reason: "registry unreachable".into(),
            }),
            RegistryMode::Erroring(reason) => Err(BusError::PolicyEvaluation(reason.clone())),
        }
    }

    async fn health_check(&self) -> bool {
        matches!(*self.mode.read(), RegistryMode::Serving)
    }
}

/// Audit sink keeping everything in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
    metrics: RwLock<Vec<MetricsEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    pub fn metrics(&self) -> Vec<MetricsEvent> {
        self.metrics.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log_decision(&self, record: &AuditRecord) -> BusResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn record_metrics(&self, event: &MetricsEvent) -> BusResult<()> {
        self.metrics.write().push(event.clone());
        Ok(())
    }
}

/// Audit sink that rejects every record.
#[derive(Default)]
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn log_decision(&self, _record: &AuditRecord) -> BusResult<()> {
        Err(BusError::HandlerExecution {
            handler: "audit".into(),
            reason: "audit store unavailable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use agent_bus_types::MessageType;

    use super::*;

    fn message() -> Message {
        Message::builder("agent-a", "agent-b", "tenant-1")
            .message_type(MessageType::Command)
            .constitutional_hash("cdd01ef066bc6cf2")
            .payload_entry(IMPACT_SCORE_KEY, serde_json::json!(0.9))
            .build()
    }

    #[tokio::test]
    async fn scorer_reads_payload_when_asked() {
        assert_eq!(MockImpactScorer::fixed(0.2).score(&message()).await.unwrap(), 0.2);
        assert_eq!(
            MockImpactScorer::from_payload(0.2).score(&message()).await.unwrap(),
            0.9
        );
    }

    #[tokio::test]
    async fn unreachable_collaborators_report_unavailability() {
        let engine = MockPolicyEngine::unreachable();
        let err = engine
            .evaluate("p", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_unavailability());
        assert!(!engine.health_check().await);

        let registry = MockPolicyRegistry::with_hash("h");
        registry.set_unreachable();
        let err = registry.active_hash(&TenantId::from("t")).await.unwrap_err();
        assert!(err.is_unavailability());

        registry.set_erroring("policy bundle corrupt");
        let err = registry.active_hash(&TenantId::from("t")).await.unwrap_err();
        assert!(!err.is_unavailability());
    }
}
