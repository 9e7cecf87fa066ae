//! Interfaces of the external collaborators the bus consults.
//!
//! Implementations live outside this crate (policy engines, ML scorers,
//! review queues, audit stores). Unreachability must be reported as an
//! error for which `BusError::is_unavailability` holds, never as an
//! allow or a default score.

use std::collections::BTreeMap;

use agent_bus_types::{
    AgentId, BusResult, ConversationId, Message, MessageId, MessageStatus, MessageType, TenantId,
    ValidationResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scores the impact of a message on a `[0, 1]` scale.
#[async_trait]
pub trait ImpactScorer: Send + Sync {
    async fn score(&self, message: &Message) -> BusResult<f64>;

    /// Liveness probe used by recovery.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Verdict returned by a deliberation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DeliberationDecision {
    Approved,
    Rejected { reason: String },
}

/// Human or committee review for high-impact messages.
#[async_trait]
pub trait DeliberationQueue: Send + Sync {
    async fn queue_for_deliberation(&self, message: &Message) -> BusResult<DeliberationDecision>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Answer of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            errors: Vec::new(),
        }
    }

    pub fn deny(errors: Vec<String>) -> Self {
        Self {
            allow: false,
            errors,
        }
    }
}

/// OPA-like policy engine.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Engine name used in errors and logs.
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        policy_path: &str,
        input: &serde_json::Value,
    ) -> BusResult<PolicyDecision>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Source of the constitutional hash currently in force.
#[async_trait]
pub trait PolicyRegistry: Send + Sync {
    /// Active hash for a tenant.
    async fn active_hash(&self, tenant_id: &TenantId) -> BusResult<String>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Pipeline stage an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Validation,
    Delivery,
    Deliberation,
}

/// One decision taken about a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub message_type: MessageType,
    pub stage: AuditStage,
    pub status: MessageStatus,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub impact_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Record for a validation verdict.
    pub fn validation(message: &Message, result: &ValidationResult) -> Self {
        Self {
            errors: result.errors().to_vec(),
            warnings: result.warnings().to_vec(),
            ..Self::outcome(message, AuditStage::Validation, result.is_valid())
        }
    }

    /// Record for a lifecycle outcome.
    pub fn outcome(message: &Message, stage: AuditStage, is_valid: bool) -> Self {
        Self {
            message_id: message.message_id,
            conversation_id: message.conversation_id,
            tenant_id: message.tenant_id.clone(),
            from_agent: message.from_agent.clone(),
            to_agent: message.to_agent.clone(),
            message_type: message.message_type,
            stage,
            status: message.status(),
            is_valid,
            errors: Vec::new(),
            warnings: Vec::new(),
            impact_score: message.impact_score(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Counter-style event forwarded to an audit sink alongside decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricsEvent {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Destination for audit records. Best-effort: failures are counted by the
/// dispatcher, never surfaced to message senders.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_decision(&self, record: &AuditRecord) -> BusResult<()>;

    async fn record_metrics(&self, _event: &MetricsEvent) -> BusResult<()> {
        Ok(())
    }
}
