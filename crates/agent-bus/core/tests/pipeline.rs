//! End-to-end behaviour of the message pipeline.

use std::sync::Arc;
use std::time::Duration;

use agent_bus_core::mocks::{
    MemoryAuditSink, MockDeliberationQueue, MockImpactScorer, MockPolicyEngine, MockPolicyRegistry,
};
use agent_bus_core::{
    AgentRegistration, AuditStage, BusConfig, DeliberationOutcome, DeliberationRecord, MessageBus,
    MessageHandler, RoutingPath, StrategyKind, BUS_COMPONENT, DEFAULT_CONSTITUTIONAL_HASH,
};
use agent_bus_resilience::RecoveryState;
use agent_bus_types::{
    AgentRole, BusError, BusResult, ConversationId, Message, MessageId, MessageStatus, MessageType,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

const HASH: &str = DEFAULT_CONSTITUTIONAL_HASH;
const TENANT: &str = "tenant-a";

struct Harness {
    bus: MessageBus,
    audit: Arc<MemoryAuditSink>,
}

async fn harness_with(config: BusConfig, queue: MockDeliberationQueue) -> Harness {
    let audit = Arc::new(MemoryAuditSink::new());
    let bus = MessageBus::builder(config)
        .with_impact_scorer(Arc::new(MockImpactScorer::from_payload(0.1)))
        .with_deliberation_queue(Arc::new(queue))
        .with_audit_sink(audit.clone())
        .build()
        .unwrap();
    bus.start().await.unwrap();
    for agent in ["planner", "executor"] {
        bus.register_agent(AgentRegistration::new(agent, TENANT)).unwrap();
    }
    Harness { bus, audit }
}

async fn harness() -> Harness {
    harness_with(BusConfig::default(), MockDeliberationQueue::approve_all()).await
}

fn message(hash: &str, impact: f64) -> Message {
    Message::builder("planner", "executor", TENANT)
        .message_type(MessageType::Command)
        .constitutional_hash(hash)
        .payload_entry("impact_score", json!(impact))
        .build()
}

async fn wait_for_decision(bus: &MessageBus, id: &MessageId) -> DeliberationRecord {
    for _ in 0..200 {
        if let Some(record) = bus.deliberation_outcome(id) {
            if record.outcome != DeliberationOutcome::Pending {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deliberation for {id} never decided");
}

struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn handle(&self, message: &Message) -> BusResult<Option<Message>> {
        Ok(Some(
            Message::builder(message.to_agent.clone(), message.from_agent.clone(), message.tenant_id.clone())
                .message_type(MessageType::Response)
                .conversation(message.conversation_id)
                .constitutional_hash(message.constitutional_hash.clone())
                .build(),
        ))
    }
}

/// Keeps every payload it sees.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, message: &Message) -> BusResult<Option<Message>> {
        self.seen.lock().push(message.clone());
        Ok(None)
    }
}

struct Slow(Duration);

#[async_trait]
impl MessageHandler for Slow {
    async fn handle(&self, _message: &Message) -> BusResult<Option<Message>> {
        tokio::time::sleep(self.0).await;
        Ok(None)
    }
}

#[tokio::test]
async fn mismatched_hash_is_never_delivered() {
    let h = harness().await;
    let recorder = Arc::new(Recorder::default());
    h.bus.register_handler(MessageType::Command, recorder.clone());

    for bad in ["deadbeefdeadbeef", "CDD01EF066BC6CF2", "zz-not-a-hash!!", "cdd01ef066bc6cf"] {
        let err = h.bus.send_message(message(bad, 0.1), None).await.unwrap_err();
        match err {
            BusError::ConstitutionalHashMismatch { expected, received, .. } => {
                assert_eq!(expected, HASH);
                assert!(received.chars().all(|c| c.is_ascii_alphanumeric() || c == '.'));
                assert!(received.len() <= 11);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
    assert!(recorder.seen.lock().is_empty());

    h.bus.stop().await.unwrap();
    let records = h.audit.records();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| !r.is_valid && r.stage == AuditStage::Validation));
    assert!(records.iter().all(|r| r.status != MessageStatus::Delivered));
}

#[tokio::test]
async fn low_impact_is_delivered_on_the_fast_path() {
    let h = harness().await;
    h.bus.register_handler(MessageType::Command, Arc::new(Echo));

    let receipt = h.bus.send_message(message(HASH, 0.79), None).await.unwrap();
    assert_eq!(receipt.status, MessageStatus::Delivered);
    assert_eq!(receipt.path, RoutingPath::Fast);
    assert_eq!(receipt.impact_score, Some(0.79));

    let response = receipt.response.expect("echo response");
    assert_eq!(response.to_agent.as_str(), "planner");
    assert_eq!(response.conversation_id, receipt.conversation_id);

    let metrics = h.bus.render_metrics().unwrap();
    assert!(metrics.contains(r#"agent_bus_messages_total{result="delivered"} 1"#));
    assert!(metrics.contains(r#"agent_bus_routing_total{path="fast"} 1"#));
}

#[tokio::test]
async fn every_send_reports_latency_to_the_audit_sink() {
    let h = harness().await;
    h.bus.register_handler(MessageType::Command, Arc::new(Echo));

    h.bus.send_message(message(HASH, 0.1), None).await.unwrap();
    h.bus.send_message(message("deadbeefdeadbeef", 0.1), None).await.unwrap_err();
    h.bus.stop().await.unwrap();

    let events = h.audit.metrics();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.name == "message_latency_ms" && e.value >= 0.0));
    assert_eq!(events[0].labels["outcome"], "delivered");
    assert_eq!(events[0].labels["path"], "fast");
    assert_eq!(events[0].labels["message_type"], "COMMAND");
    assert_eq!(events[1].labels["outcome"], "constitutional_hash_mismatch");
    assert!(!events[1].labels.contains_key("path"));
}

#[tokio::test]
async fn high_impact_waits_for_deliberation() {
    let h = harness().await;
    let recorder = Arc::new(Recorder::default());
    h.bus.register_handler(MessageType::Command, recorder.clone());

    let receipt = h.bus.send_message(message(HASH, 0.8), None).await.unwrap();
    assert_eq!(receipt.status, MessageStatus::PendingDeliberation);
    assert_eq!(receipt.path, RoutingPath::Deliberation);
    assert!(receipt.response.is_none());

    let record = wait_for_decision(&h.bus, &receipt.message_id).await;
    assert_eq!(record.outcome, DeliberationOutcome::Approved);
    assert_eq!(record.status, MessageStatus::Delivered);
    assert_eq!(recorder.seen.lock().len(), 1);
}

#[tokio::test]
async fn rejected_deliberation_fails_the_message() {
    let h = harness_with(BusConfig::default(), MockDeliberationQueue::reject_all("too risky")).await;

    let receipt = h.bus.send_message(message(HASH, 0.95), None).await.unwrap();
    let record = wait_for_decision(&h.bus, &receipt.message_id).await;
    assert_eq!(
        record.outcome,
        DeliberationOutcome::Rejected {
            reason: "too risky".into()
        }
    );
    assert_eq!(record.status, MessageStatus::Failed);
}

#[tokio::test]
async fn slow_deliberation_times_out() {
    let config = BusConfig {
        deliberation_timeout_ms: 30,
        ..BusConfig::default()
    };
    let queue = MockDeliberationQueue::approve_all().with_delay(Duration::from_secs(5));
    let h = harness_with(config, queue).await;

    let receipt = h.bus.send_message(message(HASH, 0.9), None).await.unwrap();
    let record = wait_for_decision(&h.bus, &receipt.message_id).await;
    assert_eq!(record.outcome, DeliberationOutcome::TimedOut);
    assert_eq!(record.status, MessageStatus::Failed);
}

#[tokio::test]
async fn stop_aborts_pending_deliberations() {
    let queue = MockDeliberationQueue::approve_all().with_delay(Duration::from_secs(5));
    let h = harness_with(BusConfig::default(), queue).await;

    let receipt = h.bus.send_message(message(HASH, 0.9), None).await.unwrap();
    assert_eq!(h.bus.pending_deliberations(), 1);

    h.bus.stop().await.unwrap();
    let record = h.bus.deliberation_outcome(&receipt.message_id).unwrap();
    assert!(matches!(record.outcome, DeliberationOutcome::Failed { .. }));
}

#[tokio::test]
async fn unknown_recipient_is_rejected() {
    let h = harness().await;
    let msg = Message::builder("planner", "ghost", TENANT)
        .constitutional_hash(HASH)
        .build();
    let err = h.bus.send_message(msg, None).await.unwrap_err();
    assert_eq!(err.error_code(), "AGENT_NOT_REGISTERED");

    // Registration is tenant scoped.
    let other_tenant = Message::builder("planner", "executor", "tenant-b")
        .constitutional_hash(HASH)
        .build();
    assert!(matches!(
        h.bus.send_message(other_tenant, None).await,
        Err(BusError::AgentNotRegistered { .. })
    ));
}

#[tokio::test]
async fn structural_problems_are_reported() {
    let h = harness().await;
    let msg = Message::builder("planner", "", TENANT)
        .constitutional_hash(HASH)
        .build();
    let err = h.bus.send_message(msg, None).await.unwrap_err();
    assert_eq!(err.error_code(), "MESSAGE_VALIDATION_FAILED");
}

#[tokio::test]
async fn missing_capability_is_rejected() {
    let mut config = BusConfig::default();
    config
        .required_capability
        .insert(MessageType::TaskRequest, "execute".to_string());
    let h = harness_with(config, MockDeliberationQueue::approve_all()).await;
    h.bus
        .register_agent(AgentRegistration::new("worker", TENANT).capability("execute"))
        .unwrap();

    let task = |to: &str| {
        Message::builder("planner", to, TENANT)
            .message_type(MessageType::TaskRequest)
            .constitutional_hash(HASH)
            .build()
    };
    let err = h.bus.send_message(task("executor"), None).await.unwrap_err();
    assert_eq!(err.error_code(), "AGENT_CAPABILITY_MISSING");
    assert!(h.bus.send_message(task("worker"), None).await.is_ok());
}

#[tokio::test]
async fn send_deadline_is_enforced() {
    let h = harness().await;
    h.bus
        .register_handler(MessageType::Command, Arc::new(Slow(Duration::from_secs(2))));

    let msg = message(HASH, 0.1);
    let id = msg.message_id;
    let err = h.bus.send_message(msg, Some(50)).await.unwrap_err();
    match err {
        BusError::MessageTimeout { message_id, timeout_ms } => {
            assert_eq!(message_id, id);
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn expired_messages_are_not_processed() {
    let h = harness().await;
    let msg = Message::builder("planner", "executor", TENANT)
        .constitutional_hash(HASH)
        .expires_in(Duration::from_millis(1))
        .build();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = h.bus.send_message(msg, None).await.unwrap_err();
    assert_eq!(err.error_code(), "MESSAGE_EXPIRED");
}

#[tokio::test]
async fn stopped_bus_refuses_work() {
    let bus = MessageBus::builder(BusConfig::default()).build().unwrap();
    let err = bus.send_message(message(HASH, 0.1), None).await.unwrap_err();
    assert!(matches!(err, BusError::BusNotStarted));
    assert!(matches!(
        bus.list_agents(&TENANT.into()),
        Err(BusError::BusNotStarted)
    ));
}

#[tokio::test]
async fn duplicate_agents_are_refused() {
    let h = harness().await;
    let err = h
        .bus
        .register_agent(AgentRegistration::new("planner", TENANT))
        .unwrap_err();
    assert_eq!(err.error_code(), "AGENT_ALREADY_REGISTERED");

    h.bus.unregister_agent(&TENANT.into(), &"planner".into()).unwrap();
    assert!(h.bus.get_agent(&TENANT.into(), &"planner".into()).is_err());
}

#[tokio::test]
async fn verdicts_require_a_distinct_validator() {
    let h = harness().await;
    h.bus
        .register_agent(AgentRegistration::new("judge", TENANT).role(AgentRole::Judicial))
        .unwrap();
    h.bus
        .register_agent(AgentRegistration::new("builder", TENANT).role(AgentRole::Implementer))
        .unwrap();

    let verdict = |from: &str, to: &str| {
        Message::builder(from, to, TENANT)
            .message_type(MessageType::ConstitutionalValidation)
            .constitutional_hash(HASH)
            .build()
    };

    let err = h.bus.send_message(verdict("builder", "executor"), None).await.unwrap_err();
    assert_eq!(err.error_code(), "ROLE_VIOLATION");

    let err = h.bus.send_message(verdict("judge", "judge"), None).await.unwrap_err();
    assert_eq!(err.error_code(), "SELF_VALIDATION_FORBIDDEN");
    assert!(!err.is_retryable());

    let receipt = h.bus.send_message(verdict("judge", "builder"), None).await.unwrap();
    assert_eq!(receipt.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn broadcast_reaches_every_other_agent() {
    let h = harness().await;
    h.bus.register_agent(AgentRegistration::new("auditor", TENANT)).unwrap();
    let recorder = Arc::new(Recorder::default());
    h.bus.register_handler(MessageType::Event, recorder.clone());

    let event = Message::builder("planner", "*", TENANT)
        .message_type(MessageType::Event)
        .constitutional_hash(HASH)
        .build();
    let report = h.bus.broadcast_message(event, None).await.unwrap();

    let mut recipients: Vec<String> = report.delivered.iter().map(|d| d.agent_id.to_string()).collect();
    recipients.sort();
    assert_eq!(recipients, vec!["auditor", "executor"]);
    assert!(report.failed.is_empty());
    assert_eq!(recorder.seen.lock().len(), 2);

    let forged = Message::builder("planner", "*", TENANT)
        .message_type(MessageType::Event)
        .constitutional_hash("0000000000000000")
        .build();
    let err = h.bus.broadcast_message(forged, None).await.unwrap_err();
    assert_eq!(err.error_code(), "CONSTITUTIONAL_HASH_MISMATCH");
}

#[tokio::test]
async fn conversation_order_is_preserved() {
    let h = harness().await;
    let recorder = Arc::new(Recorder::default());
    h.bus.register_handler(MessageType::Command, recorder.clone());

    let conversation = ConversationId::generate();
    let sends = (0..5).map(|seq| {
        let msg = Message::builder("planner", "executor", TENANT)
            .conversation(conversation)
            .constitutional_hash(HASH)
            .payload_entry("seq", json!(seq))
            .build();
        h.bus.send_message(msg, None)
    });
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    let order: Vec<i64> = recorder
        .seen
        .lock()
        .iter()
        .map(|m| m.payload["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn payload_pii_is_redacted_before_delivery() {
    let h = harness().await;
    let recorder = Arc::new(Recorder::default());
    h.bus.register_handler(MessageType::Command, recorder.clone());

    let msg = Message::builder("planner", "executor", TENANT)
        .constitutional_hash(HASH)
        .payload_entry("contact", json!("call 555-867-5309 or mail ops@example.org"))
        .build();
    h.bus.send_message(msg, None).await.unwrap();

    let seen = recorder.seen.lock();
    let contact = seen[0].payload["contact"].as_str().unwrap();
    assert!(!contact.contains("ops@example.org"));
    assert!(!contact.contains("867-5309"));
    assert!(h.bus.metrics().pii_redactions_total.get() >= 2);
}

#[tokio::test]
async fn injected_bus_faults_fail_delivery_until_stopped() {
    let h = harness().await;
    h.bus
        .chaos()
        .inject_errors(BUS_COMPONENT, 1.0, "injected", 30.0, None)
        .await
        .unwrap();

    let err = h.bus.send_message(message(HASH, 0.1), None).await.unwrap_err();
    assert_eq!(err.error_code(), "MESSAGE_DELIVERY_FAILED");

    assert_eq!(h.bus.chaos().emergency_stop(), 1);
    assert!(h.bus.chaos().active_scenarios().is_empty());
    assert!(h.bus.send_message(message(HASH, 0.1), None).await.is_ok());
}

#[tokio::test]
async fn unreachable_policy_engine_fails_closed_and_schedules_recovery() {
    let mut config = BusConfig::default();
    config.validation.strategy = StrategyKind::ExternalPolicyEngine;
    let engine = Arc::new(MockPolicyEngine::unreachable());

    let bus = MessageBus::builder(config)
        .with_policy_engine(engine.clone())
        .build()
        .unwrap();
    bus.start().await.unwrap();
    bus.register_agent(AgentRegistration::new("executor", TENANT)).unwrap();

    let err = bus.send_message(message(HASH, 0.1), None).await.unwrap_err();
    assert_eq!(err.error_code(), "POLICY_ENGINE_UNAVAILABLE");
    assert!(err.is_retryable());

    let status = bus.recovery().get_recovery_status("policy_engine").unwrap();
    assert_ne!(status.state, RecoveryState::Idle);

    // Once the engine answers again, requests go through.
    engine.set_unreachable(false);
    bus.breakers().policy_engine.reset();
    let receipt = bus.send_message(message(HASH, 0.1), None).await.unwrap();
    assert_eq!(receipt.status, MessageStatus::Delivered);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn policy_denial_is_a_validation_failure() {
    let mut config = BusConfig::default();
    config.validation.strategy = StrategyKind::ExternalPolicyEngine;
    let bus = MessageBus::builder(config)
        .with_policy_engine(Arc::new(MockPolicyEngine::deny_all(vec!["tenant suspended".into()])))
        .build()
        .unwrap();
    bus.start().await.unwrap();
    bus.register_agent(AgentRegistration::new("executor", TENANT)).unwrap();

    match bus.send_message(message(HASH, 0.1), None).await.unwrap_err() {
        BusError::ConstitutionalValidation { errors, .. } => {
            assert_eq!(errors, vec!["tenant suspended".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_scorer_deliberates_and_schedules_recovery() {
    let scorer = Arc::new(MockImpactScorer::fixed(0.1));
    scorer.set_unreachable(true);
    let bus = MessageBus::builder(BusConfig::default())
        .with_impact_scorer(scorer)
        .build()
        .unwrap();
    bus.start().await.unwrap();
    bus.register_agent(AgentRegistration::new("executor", TENANT)).unwrap();

    let receipt = bus.send_message(message(HASH, 0.1), None).await.unwrap();
    assert_eq!(receipt.path, RoutingPath::Deliberation);
    assert_eq!(receipt.impact_score, None);

    let status = bus.recovery().get_recovery_status("impact_scorer").unwrap();
    assert_ne!(status.state, RecoveryState::Idle);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn rotated_registry_hash_is_honoured() {
    let mut config = BusConfig::default();
    config.validation.strategy = StrategyKind::DynamicPolicy;
    let registry = Arc::new(MockPolicyRegistry::with_hash("feedfacefeedface"));

    let bus = MessageBus::builder(config)
        .with_policy_registry(registry.clone())
        .build()
        .unwrap();
    bus.start().await.unwrap();
    bus.register_agent(AgentRegistration::new("executor", TENANT)).unwrap();

    assert!(bus.send_message(message("feedfacefeedface", 0.1), None).await.is_ok());
    assert!(bus.send_message(message(HASH, 0.1), None).await.is_err());

    // Unreachable registry falls back to the configured hash.
    registry.set_unreachable();
    assert!(bus.send_message(message(HASH, 0.1), None).await.is_ok());
    assert!(bus.send_message(message("feedfacefeedface", 0.1), None).await.is_err());
}

#[tokio::test]
async fn fail_closed_registry_denies_when_unreachable() {
    let mut config = BusConfig::default();
    config.validation.strategy = StrategyKind::DynamicPolicy;
    config.policy_fail_closed = true;
    let registry = Arc::new(MockPolicyRegistry::with_hash(HASH));
    registry.set_unreachable();

    let bus = MessageBus::builder(config)
        .with_policy_registry(registry)
        .build()
        .unwrap();
    bus.start().await.unwrap();
    bus.register_agent(AgentRegistration::new("executor", TENANT)).unwrap();

    let err = bus.send_message(message(HASH, 0.1), None).await.unwrap_err();
    assert!(err.is_unavailability());
}

#[tokio::test]
async fn health_status_reports_breakers() {
    let h = harness().await;
    h.bus.breakers().deliberation.force_state(agent_bus_resilience::CircuitState::Open);
    h.bus.health().poll_once();

    let status = h.bus.get_health_status();
    assert!(status.running);
    assert_eq!(status.constitutional_hash, HASH);
    assert_eq!(status.health_score, Some(0.75));
    assert_eq!(
        status.circuit_breakers["deliberation"],
        agent_bus_resilience::CircuitState::Open
    );
}
