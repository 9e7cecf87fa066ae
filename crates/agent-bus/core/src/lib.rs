//! # Agent Bus Core
//!
//! Constitutionally governed message bus for multi-agent systems.
//!
//! Every message is checked against the expected constitutional hash before
//! anything else happens to it. Accepted messages are scored for impact and
//! either delivered straight away or held for deliberation.
//!
//! ## Key Components
//!
//! - [`MessageBus`]: lifecycle, agent registry, `send_message` and friends
//! - [`ValidationStrategy`]: static hash, dynamic policy, external policy
//!   engine, accelerated and composite validation
//! - [`MessageProcessor`]: runs validation, audits the verdict, redacts PII
//! - [`ImpactRouter`]: fast path versus deliberation on the impact score
//! - [`RoleGuard`]: implementer/validator separation
//! - [`BusMetrics`]: Prometheus registry behind `GET /metrics`
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_bus_core::{AgentRegistration, BusConfig, MessageBus};
//! use agent_bus_types::{Message, MessageType};
//!
//! # async fn example() -> agent_bus_types::BusResult<()> {
//! let bus = MessageBus::builder(BusConfig::default()).build()?;
//! bus.start().await?;
//!
//! bus.register_agent(AgentRegistration::new("executor", "tenant-a"))?;
//!
//! let message = Message::builder("planner", "executor", "tenant-a")
//!     .message_type(MessageType::Command)
//!     .constitutional_hash(bus.config().constitutional_hash.clone())
//!     .build();
//! let receipt = bus.send_message(message, None).await?;
//! println!("{} -> {}", receipt.message_id, receipt.status);
//!
//! bus.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure policy
//!
//! Unreachable collaborators never produce an allow. The request that hits
//! the outage fails closed; recovery is scheduled so that later requests
//! succeed once the dependency is back. Audit, metrics and health callbacks
//! are fire-and-forget and never fail or slow down a caller.

pub mod audit;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod deliberation;
pub mod dependencies;
pub mod metrics;
pub mod mocks;
pub mod ordering;
pub mod pii;
pub mod processor;
pub mod registry;
pub mod roles;
pub mod router;
pub mod validation;

pub use audit::{AuditDispatcher, AuditEvent};
pub use bus::{
    BroadcastDelivery, BroadcastFailure, BroadcastReport, BusHealthStatus, MessageBus,
    MessageBusBuilder, MessageHandler, SendReceipt, BUS_COMPONENT,
};
pub use collaborators::{
    AuditRecord, AuditSink, AuditStage, DeliberationDecision, DeliberationQueue, ImpactScorer,
    MetricsEvent, PolicyDecision, PolicyEngine, PolicyRegistry,
};
pub use config::{AuditConfig, BusConfig, RegistryFallback, ValidationConfig, DEFAULT_CONSTITUTIONAL_HASH};
pub use deliberation::{DeliberationOutcome, DeliberationRecord};
pub use dependencies::DependencyBreakers;
pub use metrics::BusMetrics;
pub use ordering::ConversationSequencer;
pub use pii::{detect_pii, redact_pii, PiiKind, PiiMatch, REDACTED};
pub use processor::{MessageProcessor, Origin, ProcessingContext};
pub use registry::{AgentRecord, AgentRegistration, AgentRegistry};
pub use roles::{ImplementerId, RoleGuard, ValidationAssignment, ValidatorId};
pub use router::{select_path, ImpactRouter, RoutingDecision, RoutingPath};
pub use validation::{CompositeMode, StrategyKind, ValidationStrategy};
