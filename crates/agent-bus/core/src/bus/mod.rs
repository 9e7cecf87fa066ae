//! The message bus.
//!
//! [`MessageBus`] owns the agent registry, the dependency breakers and the
//! resilience components, and drives every message through one pipeline:
//!
//! 1. structural checks, then the conversation's turn and a pipeline slot
//! 2. expiry and chaos faults for the bus itself
//! 3. constitutional validation ([`MessageProcessor`])
//! 4. role separation for verdict messages, recipient lookup
//! 5. impact routing: fast-path delivery to handlers, or hand-off to
//!    deliberation on a detached task
//!
//! Every outcome is counted in [`BusMetrics`] and sent to the audit sink
//! without waiting on it.

mod builder;
mod handler;

pub use builder::MessageBusBuilder;
pub use handler::MessageHandler;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_bus_resilience::{
    AutoRecoveryHook, ChaosEngine, CircuitBreaker, CircuitState, HealthAggregator,
    RecoveryOrchestrator, RecoveryPolicy, ResilienceError, SystemHealthStatus,
};
use agent_bus_types::{
    AgentId, BusError, BusResult, ConversationId, ErrorKind, Message, MessageId, MessageStatus,
    MessageType, TenantId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use self::handler::HandlerTable;
use crate::audit::AuditDispatcher;
use crate::collaborators::{
    AuditRecord, AuditSink, AuditStage, DeliberationDecision, DeliberationQueue, ImpactScorer,
    MetricsEvent, PolicyEngine, PolicyRegistry,
};
use crate::config::BusConfig;
use crate::deliberation::{DeliberationOutcome, DeliberationRecord, DeliberationTracker};
use crate::dependencies::{
    guarded, DependencyBreakers, DependencyProbe, DELIBERATION, IMPACT_SCORER, POLICY_ENGINE,
    POLICY_REGISTRY,
};
use crate::metrics::BusMetrics;
use crate::ordering::ConversationSequencer;
use crate::processor::{MessageProcessor, Origin, ProcessingContext};
use crate::registry::{AgentRecord, AgentRegistration, AgentRegistry};
use crate::roles::RoleGuard;
use crate::router::{ImpactRouter, RoutingDecision, RoutingPath};
use crate::validation::{mismatched_hash, ValidationStrategy};

/// Chaos target checked before any message is processed.
pub const BUS_COMPONENT: &str = "message_bus";

/// Result of a successful `send_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub status: MessageStatus,
    pub path: RoutingPath,
    pub impact_score: Option<f64>,
    /// First handler response, fast path only.
    pub response: Option<Message>,
    pub timestamp: DateTime<Utc>,
}

impl SendReceipt {
    fn new(message: &Message, path: RoutingPath, response: Option<Message>) -> Self {
        Self {
            message_id: message.message_id,
            conversation_id: message.conversation_id,
            status: message.status(),
            path,
            impact_score: message.impact_score(),
            response,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastDelivery {
    pub agent_id: AgentId,
    pub message_id: MessageId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastFailure {
    pub agent_id: AgentId,
    pub error_code: String,
    pub error: String,
}

/// Per-recipient results of a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub message_id: MessageId,
    pub delivered: Vec<BroadcastDelivery>,
    pub failed: Vec<BroadcastFailure>,
}

/// Health as reported by [`MessageBus::get_health_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusHealthStatus {
    pub status: SystemHealthStatus,
    pub health_score: Option<f64>,
    pub constitutional_hash: String,
    pub circuit_breakers: BTreeMap<String, CircuitState>,
    pub running: bool,
    pub timestamp: DateTime<Utc>,
}

pub(crate) struct Collaborators {
    pub(crate) impact_scorer: Arc<dyn ImpactScorer>,
    pub(crate) deliberation_queue: Arc<dyn DeliberationQueue>,
    pub(crate) policy_engine: Option<Arc<dyn PolicyEngine>>,
    pub(crate) policy_registry: Option<Arc<dyn PolicyRegistry>>,
    pub(crate) audit_sink: Arc<dyn AuditSink>,
}

/// State that exists only between `start` and `stop`.
struct BusRuntime {
    processor: MessageProcessor,
    router: ImpactRouter,
    audit: Arc<AuditDispatcher>,
    sequencer: ConversationSequencer,
    recovery_events: JoinHandle<()>,
}

pub struct MessageBus {
    config: BusConfig,
    strategy: Arc<ValidationStrategy>,
    collaborators: Collaborators,
    breakers: DependencyBreakers,
    registry: Arc<AgentRegistry>,
    handlers: Arc<HandlerTable>,
    health: Arc<HealthAggregator>,
    recovery: Arc<RecoveryOrchestrator>,
    chaos: Arc<ChaosEngine>,
    metrics: Arc<BusMetrics>,
    deliberations: Arc<DeliberationTracker>,
    runtime: RwLock<Option<Arc<BusRuntime>>>,
    hook_installed: AtomicBool,
}

impl MessageBus {
    pub fn builder(config: BusConfig) -> MessageBusBuilder {
        MessageBusBuilder::new(config)
    }

    /// Start background work: audit drain, health polling, recovery loop.
    pub async fn start(&self) -> BusResult<()> {
        let mut slot = self.runtime.write();
        if slot.is_some() {
            return Err(BusError::BusAlreadyStarted);
        }
        self.config.validate()?;

        for (name, breaker) in self.breakers.all() {
            self.health.register_circuit_breaker(name, breaker.clone());
            self.recovery.register_circuit_breaker(name, breaker.clone());
            self.chaos.register_circuit_breaker(name, breaker.clone());

            let mut policy = RecoveryPolicy::from_config(&self.config.recovery);
            if let Some(probe) = self.probe(name) {
                policy = policy.with_health_check(Arc::new(probe));
            }
            self.recovery.register_service(name, policy);
        }

        if !self.hook_installed.swap(true, Ordering::SeqCst) {
            self.health.on_health_change(Arc::new(AutoRecoveryHook::new(
                self.recovery.clone(),
                self.config.recovery.default_priority,
            )));
        }

        self.health
            .start()
            .map_err(|e| BusError::config("health", e.to_string()))?;
        if let Err(e) = self.recovery.start() {
            self.health.stop();
            return Err(BusError::config("recovery", e.to_string()));
        }

        let audit = Arc::new(AuditDispatcher::start(
            self.collaborators.audit_sink.clone(),
            self.config.audit.channel_capacity,
            self.metrics.clone(),
        ));

        *slot = Some(Arc::new(BusRuntime {
            processor: MessageProcessor::new(
                self.strategy.clone(),
                audit.clone(),
                self.metrics.clone(),
                self.config.enable_pii_redaction,
            ),
            router: ImpactRouter::new(
                self.collaborators.impact_scorer.clone(),
                self.breakers.impact_scorer.clone(),
                self.config.deliberation_threshold,
            ),
            audit,
            sequencer: ConversationSequencer::new(self.config.max_concurrent_messages),
            recovery_events: self.spawn_recovery_metrics(),
        }));

        info!(
            constitutional_hash = %self.config.constitutional_hash,
            strategy = self.strategy.name(),
            deliberation_threshold = self.config.deliberation_threshold,
            "Message bus started"
        );
        Ok(())
    }

    /// Stop background work and drain the audit channel. Idempotent.
    pub async fn stop(&self) -> BusResult<()> {
        let runtime = self.runtime.write().take();
        let Some(runtime) = runtime else {
            return Ok(());
        };

        self.health.stop();
        self.recovery.stop();
        runtime.sequencer.close();
        runtime.recovery_events.abort();

        let aborted = self.deliberations.abort_all("bus stopped");
        runtime
            .audit
            .shutdown(Duration::from_millis(self.config.audit.drain_timeout_ms))
            .await;

        info!(aborted_deliberations = aborted, "Message bus stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.read().is_some()
    }

    // ---- agents ----

    pub fn register_agent(&self, registration: AgentRegistration) -> BusResult<AgentRecord> {
        self.ensure_running()?;
        self.registry.register(registration)
    }

    pub fn unregister_agent(&self, tenant_id: &TenantId, agent_id: &AgentId) -> BusResult<AgentRecord> {
        self.ensure_running()?;
        self.registry.unregister(tenant_id, agent_id)
    }

    pub fn get_agent(&self, tenant_id: &TenantId, agent_id: &AgentId) -> BusResult<AgentRecord> {
        self.ensure_running()?;
        self.registry.require(tenant_id, agent_id)
    }

    pub fn list_agents(&self, tenant_id: &TenantId) -> BusResult<Vec<AgentRecord>> {
        self.ensure_running()?;
        Ok(self.registry.list(tenant_id))
    }

    /// Add a handler for delivered messages of `message_type`. Handlers may
    /// be registered before the bus starts.
    pub fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        debug!(message_type = %message_type, handler = handler.name(), "Handler registered");
        self.handlers.register(message_type, handler);
    }

    pub fn handler_count(&self, message_type: MessageType) -> usize {
        self.handlers.count(message_type)
    }

    // ---- messages ----

    /// Validate, route and deliver one message.
    ///
    /// `timeout_ms` (or the configured default) bounds the whole call; on
    /// expiry the in-flight work is dropped and `MessageTimeout` returned.
    /// Messages routed to deliberation return as soon as they are queued,
    /// with status `PENDING_DELIBERATION`.
    #[instrument(
        skip(self, message),
        fields(message_id = %message.message_id, tenant_id = %message.tenant_id, message_type = %message.message_type)
    )]
    pub async fn send_message(&self, message: Message, timeout_ms: Option<u64>) -> BusResult<SendReceipt> {
        let runtime = self.current_runtime()?;
        let message_id = message.message_id;
        let message_type = message.message_type;
        self.with_deadline(
            &runtime,
            message_id,
            message_type,
            timeout_ms,
            self.dispatch(&runtime, message, Origin::Send),
        )
        .await
    }

    /// Send a copy of `message` to every agent of its tenant except the
    /// sender.
    ///
    /// Each copy gets its own id and goes through the full pipeline. A
    /// constitutional or role failure would repeat for every recipient, so
    /// the first one aborts the broadcast.
    #[instrument(skip(self, message), fields(message_id = %message.message_id, tenant_id = %message.tenant_id))]
    pub async fn broadcast_message(&self, message: Message, timeout_ms: Option<u64>) -> BusResult<BroadcastReport> {
        let runtime = self.current_runtime()?;
        message.validate_structure()?;

        let recipients: Vec<AgentId> = self
            .registry
            .list(&message.tenant_id)
            .into_iter()
            .map(|record| record.agent_id)
            .filter(|agent_id| agent_id != &message.from_agent)
            .collect();

        let mut report = BroadcastReport {
            message_id: message.message_id,
            delivered: Vec::with_capacity(recipients.len()),
            failed: Vec::new(),
        };

        for agent_id in recipients {
            let copy = message.readdressed(agent_id.clone());
            let copy_id = copy.message_id;
            let copy_type = copy.message_type;
            match self
                .with_deadline(
                    &runtime,
                    copy_id,
                    copy_type,
                    timeout_ms,
                    self.dispatch(&runtime, copy, Origin::Broadcast),
                )
                .await
            {
                Ok(receipt) => report.delivered.push(BroadcastDelivery {
                    agent_id,
                    message_id: receipt.message_id,
                    status: receipt.status,
                }),
                Err(e) if matches!(e.kind(), ErrorKind::Constitutional | ErrorKind::RoleSeparation) => {
                    return Err(e);
                }
                Err(e) => report.failed.push(BroadcastFailure {
                    agent_id,
                    error_code: e.error_code().to_string(),
                    error: e.to_string(),
                }),
            }
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );
        Ok(report)
    }

    /// Outcome of a message handed to deliberation.
    pub fn deliberation_outcome(&self, message_id: &MessageId) -> Option<DeliberationRecord> {
        self.deliberations.get(message_id)
    }

    pub fn pending_deliberations(&self) -> usize {
        self.deliberations.pending()
    }

    // ---- health & metrics ----

    /// Latest aggregated health. Read-only; available whether or not the
    /// bus is running.
    pub fn get_health_status(&self) -> BusHealthStatus {
        let report = self.health.get_system_health();
        BusHealthStatus {
            status: report.status,
            health_score: report.health_score,
            constitutional_hash: self.config.constitutional_hash.clone(),
            circuit_breakers: self
                .breakers
                .all()
                .iter()
                .map(|(name, breaker)| (name.to_string(), breaker.state()))
                .collect(),
            running: self.is_running(),
            timestamp: report.timestamp,
        }
    }

    /// Refresh gauges and render the Prometheus text exposition.
    pub fn render_metrics(&self) -> BusResult<String> {
        self.metrics.set_health(&self.health.get_system_health());
        for (name, breaker) in self.breakers.all() {
            self.metrics.set_breaker_state(name, breaker.state());
        }
        self.metrics.set_chaos_active(self.chaos.active_count());
        self.metrics.export().map_err(|e| BusError::HandlerExecution {
            handler: "metrics".into(),
            reason: e.to_string(),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn validation_strategy(&self) -> &ValidationStrategy {
        &self.strategy
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    pub fn chaos(&self) -> &Arc<ChaosEngine> {
        &self.chaos
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    pub fn breakers(&self) -> &DependencyBreakers {
        &self.breakers
    }

    pub fn circuit_breaker(&self, name: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers
            .all()
            .into_iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, breaker)| breaker)
    }

    // ---- pipeline ----

    fn ensure_running(&self) -> BusResult<()> {
        self.current_runtime().map(|_| ())
    }

    fn current_runtime(&self) -> BusResult<Arc<BusRuntime>> {
        self.runtime.read().clone().ok_or(BusError::BusNotStarted)
    }

    /// Bound `work` by the deadline and report its latency to the audit sink.
    async fn with_deadline<F>(
        &self,
        runtime: &BusRuntime,
        message_id: MessageId,
        message_type: MessageType,
        timeout_ms: Option<u64>,
        work: F,
    ) -> BusResult<SendReceipt>
    where
        F: std::future::Future<Output = BusResult<SendReceipt>>,
    {
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let started = Instant::now();
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), work).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.record_message("message_timeout");
                warn!(message_id = %message_id, timeout_ms, "Message timed out");
                Err(BusError::MessageTimeout { message_id, timeout_ms })
            }
        };
        runtime
            .audit
            .metric(latency_event(message_type, started.elapsed(), &result));
        result
    }

    async fn dispatch(&self, runtime: &BusRuntime, mut message: Message, origin: Origin) -> BusResult<SendReceipt> {
        if let Err(e) = message.validate_structure() {
            self.metrics.record_message(&result_label(&e));
            return Err(e);
        }

        let _permit = runtime.sequencer.acquire(message.conversation_id).await?;
        message.transition_to(MessageStatus::Processing)?;
        let message_id = message.message_id;

        if message.is_expired(Utc::now()) {
            message.transition_to(MessageStatus::Expired)?;
            let error = BusError::MessageExpired { message_id };
            self.metrics.record_message(&result_label(&error));
            runtime
                .audit
                .decision(AuditRecord::outcome(&message, AuditStage::Delivery, false).with_error(error.to_string()));
            return Err(error);
        }

        if let Err(e) = self.chaos.perturb(BUS_COMPONENT).await {
            let error = BusError::MessageDelivery {
                message_id,
                reason: e.to_string(),
            };
            return Err(self.fail(runtime, &mut message, Some(AuditStage::Delivery), error));
        }

        // Constitutional gate.
        let ctx = ProcessingContext::new(origin);
        let verdict = match runtime.processor.process_message(&mut message, &ctx).await {
            Ok(verdict) => verdict,
            Err(e) => {
                if let Some(dependency) = unavailable_dependency(&e) {
                    self.schedule_dependency_recovery(dependency);
                }
                return Err(self.fail(runtime, &mut message, None, e));
            }
        };
        if !verdict.is_valid() {
            let error = match mismatched_hash(&verdict) {
                Some(expected) => BusError::hash_mismatch(Some(message_id), expected, &message.constitutional_hash),
                None => BusError::ConstitutionalValidation {
                    message_id,
                    errors: verdict.errors().to_vec(),
                },
            };
            return Err(self.fail(runtime, &mut message, None, error));
        }

        if self.config.enforce_roles && message.message_type.is_validation_verdict() {
            let role_of = |agent_id: &AgentId| {
                self.registry
                    .get(&message.tenant_id, agent_id)
                    .and_then(|record| record.role)
            };
            let sender_role = role_of(&message.from_agent);
            let recipient_role = role_of(&message.to_agent);
            match RoleGuard::check_verdict(&message, sender_role, recipient_role) {
                Ok(Some(assignment)) => debug!(
                    message_id = %message_id,
                    implementer = %assignment.implementer().agent_id(),
                    validator = %assignment.validator().agent_id(),
                    "Verdict bound to implementer"
                ),
                Ok(None) => {}
                Err(e) => return Err(self.fail(runtime, &mut message, Some(AuditStage::Validation), e)),
            }
        }

        let recipient = match self.registry.require(&message.tenant_id, &message.to_agent) {
            Ok(recipient) => recipient,
            Err(e) => return Err(self.fail(runtime, &mut message, Some(AuditStage::Delivery), e)),
        };
        if let Some(capability) = self.config.required_capability.get(&message.message_type) {
            if !recipient.has_capability(capability) {
                let error = BusError::AgentCapabilityMissing {
                    agent_id: recipient.agent_id.clone(),
                    capability: capability.clone(),
                };
                return Err(self.fail(runtime, &mut message, Some(AuditStage::Delivery), error));
            }
        }

        let decision = runtime.router.route(&mut message).await;
        self.metrics.record_route(decision.path);
        if decision.scorer_unavailable {
            self.schedule_dependency_recovery(IMPACT_SCORER);
        }

        match decision.path {
            RoutingPath::Fast => self.deliver(runtime, message).await,
            RoutingPath::Deliberation => self.deliberate(runtime, message, decision),
        }
    }

    async fn deliver(&self, runtime: &BusRuntime, mut message: Message) -> BusResult<SendReceipt> {
        if let Err(e) = self.chaos.perturb(message.to_agent.as_str()).await {
            let error = BusError::MessageDelivery {
                message_id: message.message_id,
                reason: e.to_string(),
            };
            return Err(self.fail(runtime, &mut message, Some(AuditStage::Delivery), error));
        }

        let response = match self.handlers.invoke(&message).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(runtime, &mut message, Some(AuditStage::Delivery), e)),
        };

        message.transition_to(MessageStatus::Delivered)?;
        self.metrics.record_message("delivered");
        runtime
            .audit
            .decision(AuditRecord::outcome(&message, AuditStage::Delivery, true));
        debug!(message_id = %message.message_id, "Message delivered");
        Ok(SendReceipt::new(&message, RoutingPath::Fast, response))
    }

    fn deliberate(&self, runtime: &BusRuntime, mut message: Message, decision: RoutingDecision) -> BusResult<SendReceipt> {
        message.transition_to(MessageStatus::PendingDeliberation)?;
        let message_id = message.message_id;

        self.deliberations.begin(message_id, decision.impact_score);
        self.metrics.record_message("pending_deliberation");
        let mut record = AuditRecord::outcome(&message, AuditStage::Deliberation, true);
        if let Some(reason) = &decision.degraded {
            record.warnings.push(reason.clone());
        }
        runtime.audit.decision(record);

        let receipt = SendReceipt::new(&message, RoutingPath::Deliberation, None);
        let job = DeliberationJob {
            queue: self.collaborators.deliberation_queue.clone(),
            breaker: self.breakers.deliberation.clone(),
            tracker: self.deliberations.clone(),
            handlers: self.handlers.clone(),
            audit: runtime.audit.clone(),
            metrics: self.metrics.clone(),
            recovery: self.recovery.clone(),
            recovery_priority: self.config.recovery.default_priority,
            timeout: Duration::from_millis(self.config.deliberation_timeout_ms),
        };
        let task = tokio::spawn(job.run(message));
        self.deliberations.attach_task(message_id, task);

        info!(
            message_id = %message_id,
            impact_score = ?decision.impact_score,
            degraded = decision.degraded.is_some(),
            "Message queued for deliberation"
        );
        Ok(receipt)
    }

    /// Mark the message failed, count and audit it, and hand back the error.
    fn fail(&self, runtime: &BusRuntime, message: &mut Message, stage: Option<AuditStage>, error: BusError) -> BusError {
        if let Err(e) = message.transition_to(MessageStatus::Failed) {
            debug!(message_id = %message.message_id, error = %e, "Status already final");
        }
        self.metrics.record_message(&result_label(&error));
        if let Some(stage) = stage {
            runtime
                .audit
                .decision(AuditRecord::outcome(message, stage, false).with_error(error.to_string()));
        }
        warn!(
            message_id = %message.message_id,
            error_code = error.error_code(),
            error = %error,
            "Message failed"
        );
        error
    }

    fn schedule_dependency_recovery(&self, dependency: &str) {
        schedule_recovery(&self.recovery, dependency, self.config.recovery.default_priority);
    }

    fn probe(&self, name: &str) -> Option<DependencyProbe> {
        let collaborators = &self.collaborators;
        match name {
            POLICY_ENGINE => collaborators
                .policy_engine
                .clone()
                .map(DependencyProbe::PolicyEngine),
            POLICY_REGISTRY => collaborators
                .policy_registry
                .clone()
                .map(DependencyProbe::PolicyRegistry),
            IMPACT_SCORER => Some(DependencyProbe::ImpactScorer(collaborators.impact_scorer.clone())),
            DELIBERATION => Some(DependencyProbe::Deliberation(
                collaborators.deliberation_queue.clone(),
            )),
            _ => None,
        }
    }

    fn spawn_recovery_metrics(&self) -> JoinHandle<()> {
        let mut events = self.recovery.subscribe();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => metrics.record_recovery(&event),
                    Err(RecvError::Lagged(missed)) => {
                        metrics.side_effect_failure("recovery_events");
                        debug!(missed, "Recovery event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            self.health.stop();
            self.recovery.stop();
            runtime.recovery_events.abort();
            self.deliberations.abort_all("bus dropped");
        }
    }
}

/// Everything a detached deliberation needs once `send_message` returned.
struct DeliberationJob {
    queue: Arc<dyn DeliberationQueue>,
    breaker: Arc<CircuitBreaker>,
    tracker: Arc<DeliberationTracker>,
    handlers: Arc<HandlerTable>,
    audit: Arc<AuditDispatcher>,
    metrics: Arc<BusMetrics>,
    recovery: Arc<RecoveryOrchestrator>,
    recovery_priority: u32,
    timeout: Duration,
}

impl DeliberationJob {
    async fn run(self, mut message: Message) {
        let message_id = message.message_id;
        let verdict = tokio::time::timeout(
            self.timeout,
            guarded(&self.breaker, self.queue.queue_for_deliberation(&message)),
        )
        .await;

        let outcome = match verdict {
            Ok(Ok(DeliberationDecision::Approved)) => match self.handlers.invoke(&message).await {
                Ok(_) => DeliberationOutcome::Approved,
                Err(e) => DeliberationOutcome::Failed { error: e.to_string() },
            },
            Ok(Ok(DeliberationDecision::Rejected { reason })) => DeliberationOutcome::Rejected { reason },
            Ok(Err(e)) => {
                if e.is_unavailability() {
                    schedule_recovery(&self.recovery, DELIBERATION, self.recovery_priority);
                }
                DeliberationOutcome::Failed { error: e.to_string() }
            }
            Err(_) => DeliberationOutcome::TimedOut,
        };

        if let Err(e) = message.transition_to(outcome.message_status()) {
            warn!(message_id = %message_id, error = %e, "Deliberated message already final");
        }
        let label = match &outcome {
            DeliberationOutcome::Approved => "delivered",
            DeliberationOutcome::Rejected { .. } => "deliberation_rejected",
            DeliberationOutcome::TimedOut => "deliberation_timeout",
            _ => "deliberation_failed",
        };
        self.metrics.record_message(label);

        let mut record = AuditRecord::outcome(&message, AuditStage::Deliberation, outcome == DeliberationOutcome::Approved);
        match &outcome {
            DeliberationOutcome::Rejected { reason } => record = record.with_error(reason.clone()),
            DeliberationOutcome::Failed { error } => record = record.with_error(error.clone()),
            DeliberationOutcome::TimedOut => {
                record = record.with_error(format!("no decision within {}ms", self.timeout.as_millis()))
            }
            _ => {}
        }
        self.audit.decision(record);

        info!(message_id = %message_id, outcome = ?outcome, "Deliberation decided");
        self.tracker.decide(message_id, outcome);
    }
}

fn schedule_recovery(recovery: &RecoveryOrchestrator, dependency: &str, priority: u32) {
    if recovery.has_active_recovery(dependency) {
        return;
    }
    match recovery.schedule_recovery(dependency, priority, None) {
        Ok(status) => info!(service = dependency, state = %status.state, "Recovery scheduled after unavailability"),
        Err(ResilienceError::RecoveryAlreadyActive(_)) => {}
        Err(e) => warn!(service = dependency, error = %e, "Could not schedule recovery"),
    }
}

/// Breaker name for an unavailability error, if it names one.
fn unavailable_dependency(error: &BusError) -> Option<&'static str> {
    let named = |name: &str| {
        [POLICY_ENGINE, POLICY_REGISTRY, IMPACT_SCORER, DELIBERATION]
            .into_iter()
            .find(|candidate| *candidate == name)
    };
    match error {
        BusError::DependencyUnavailable { dependency } => named(dependency),
        BusError::PolicyEngineUnavailable { engine, .. } => named(engine).or(Some(POLICY_ENGINE)),
        _ => None,
    }
}

fn result_label(error: &BusError) -> String {
    error.error_code().to_ascii_lowercase()
}

fn latency_event(message_type: MessageType, elapsed: Duration, result: &BusResult<SendReceipt>) -> MetricsEvent {
    let event = MetricsEvent::new("message_latency_ms", elapsed.as_secs_f64() * 1_000.0)
        .label("message_type", message_type.as_str());
    match result {
        Ok(receipt) => {
            let outcome = match receipt.status {
                MessageStatus::PendingDeliberation => "pending_deliberation",
                _ => "delivered",
            };
            event.label("outcome", outcome).label("path", receipt.path.as_str())
        }
        Err(e) => event.label("outcome", result_label(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailability_maps_to_breakers() {
        let registry = BusError::PolicyEngineUnavailable {
            engine: "policy_registry".into(),
            reason: "down".into(),
        };
        assert_eq!(unavailable_dependency(&registry), Some(POLICY_REGISTRY));

        let engine = BusError::PolicyEngineUnavailable {
            engine: "mock-opa".into(),
            reason: "down".into(),
        };
        assert_eq!(unavailable_dependency(&engine), Some(POLICY_ENGINE));

        let scorer = BusError::DependencyUnavailable {
            dependency: IMPACT_SCORER.into(),
        };
        assert_eq!(unavailable_dependency(&scorer), Some(IMPACT_SCORER));
        assert_eq!(unavailable_dependency(&BusError::BusNotStarted), None);
    }

    #[tokio::test]
    async fn lifecycle_is_guarded() {
        let bus = MessageBus::builder(BusConfig::default()).build().unwrap();
        assert!(matches!(
            bus.register_agent(AgentRegistration::new("a", "tenant-a")),
            Err(BusError::BusNotStarted)
        ));

        bus.start().await.unwrap();
        assert!(matches!(bus.start().await, Err(BusError::BusAlreadyStarted)));
        assert!(bus.is_running());

        bus.stop().await.unwrap();
        bus.stop().await.unwrap();
        assert!(!bus.is_running());

        // Restart after stop.
        bus.start().await.unwrap();
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn health_status_is_readable_before_start() {
        let bus = MessageBus::builder(BusConfig::with_hash("abcdef0123456789")).build().unwrap();
        let status = bus.get_health_status();
        assert!(!status.running);
        assert_eq!(status.constitutional_hash, "abcdef0123456789");
        assert_eq!(status.circuit_breakers.len(), 4);
        assert!(status
            .circuit_breakers
            .values()
            .all(|state| *state == CircuitState::Closed));
    }
}
