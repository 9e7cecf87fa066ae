//! The message: unit of work crossing an agent boundary.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};
use crate::ids::{AgentId, ConversationId, MessageId, TenantId};
use crate::validation::ValidationResult;

/// Opaque message payload.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of message carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Command,
    Query,
    Response,
    Event,
    Notification,
    Heartbeat,
    GovernanceRequest,
    GovernanceResponse,
    ConstitutionalValidation,
    TaskRequest,
    TaskResponse,
}

impl MessageType {
    /// Message types that assert a verdict over another agent's output.
    pub fn is_validation_verdict(&self) -> bool {
        matches!(
            self,
            MessageType::ConstitutionalValidation | MessageType::GovernanceResponse
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Command => "COMMAND",
            MessageType::Query => "QUERY",
            MessageType::Response => "RESPONSE",
            MessageType::Event => "EVENT",
            MessageType::Notification => "NOTIFICATION",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::GovernanceRequest => "GOVERNANCE_REQUEST",
            MessageType::GovernanceResponse => "GOVERNANCE_RESPONSE",
            MessageType::ConstitutionalValidation => "CONSTITUTIONAL_VALIDATION",
            MessageType::TaskRequest => "TASK_REQUEST",
            MessageType::TaskResponse => "TASK_RESPONSE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message priority. Numeric values are part of the wire contract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Lifecycle status of a message.
///
/// Transitions are monotonic: PENDING -> PROCESSING -> PENDING_DELIBERATION
/// -> {DELIVERED, FAILED, EXPIRED}. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Pending,
    Processing,
    PendingDeliberation,
    Delivered,
    Failed,
    Expired,
}

impl MessageStatus {
    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Processing => 1,
            MessageStatus::PendingDeliberation => 2,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Expired => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Whether `next` is a forward move from `self`.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Deliberation is only entered from an in-flight message.
        if next == MessageStatus::PendingDeliberation {
            return *self == MessageStatus::Processing;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::PendingDeliberation => "PENDING_DELIBERATION",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the bus.
///
/// `status`, `constitutional_validated` and `impact_score` are never taken
/// from the caller: they deserialize to their initial values and are only
/// moved forward through the guarded mutators below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: MessageId,
    #[serde(default)]
    pub conversation_id: ConversationId,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub tenant_id: TenantId,
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Payload,
    pub constitutional_hash: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_deserializing)]
    status: MessageStatus,
    #[serde(default, skip_deserializing)]
    constitutional_validated: bool,
    #[serde(default, skip_deserializing)]
    impact_score: Option<f64>,
}

impl Message {
    /// Start building a message.
    pub fn builder(
        from_agent: impl Into<AgentId>,
        to_agent: impl Into<AgentId>,
        tenant_id: impl Into<TenantId>,
    ) -> MessageBuilder {
        MessageBuilder::new(from_agent.into(), to_agent.into(), tenant_id.into())
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn is_constitutionally_validated(&self) -> bool {
        self.constitutional_validated
    }

    pub fn impact_score(&self) -> Option<f64> {
        self.impact_score
    }

    /// Move the status forward. Regressions and moves out of terminal states
    /// are rejected.
    pub fn transition_to(&mut self, next: MessageStatus) -> BusResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(BusError::InvalidStatusTransition {
                message_id: self.message_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a successful constitutional validation.
    ///
    /// Only a valid result checked against this message's own hash is
    /// accepted, and only once.
    pub fn mark_constitutionally_validated(&mut self, result: &ValidationResult) -> BusResult<()> {
        if self.constitutional_validated {
            return Err(BusError::ConstitutionalValidation {
                message_id: self.message_id,
                errors: vec!["message already carries a validation verdict".into()],
            });
        }
        if !result.is_valid() || result.constitutional_hash() != self.constitutional_hash {
            return Err(BusError::ConstitutionalValidation {
                message_id: self.message_id,
                errors: vec!["validation verdict does not cover this message".into()],
            });
        }
        self.constitutional_validated = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Assign the impact score. Set once; immutable afterward.
    pub fn assign_impact_score(&mut self, score: f64) -> BusResult<()> {
        if self.impact_score.is_some() {
            return Err(BusError::Routing(format!(
                "impact score already assigned to message {}",
                self.message_id
            )));
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(BusError::Routing(format!(
                "impact score {score} outside [0, 1]"
            )));
        }
        self.impact_score = Some(score);
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Structural checks that do not depend on configuration.
    pub fn validate_structure(&self) -> BusResult<()> {
        let mut problems = Vec::new();

        if self.tenant_id.is_empty() {
            problems.push("tenant_id must not be empty".to_string());
        }
        if self.from_agent.is_empty() {
            problems.push("from_agent must not be empty".to_string());
        }
        if self.to_agent.is_empty() {
            problems.push("to_agent must not be empty".to_string());
        }
        if self.constitutional_hash.trim().is_empty() {
            problems.push("constitutional_hash must not be empty".to_string());
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < self.created_at {
                problems.push("expires_at precedes created_at".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BusError::MessageValidation {
                message_id: self.message_id,
                problems,
            })
        }
    }

    /// Copy of this message addressed to a different agent, with a fresh id
    /// and reset lifecycle state.
    pub fn readdressed(&self, to_agent: AgentId) -> Message {
        let now = Utc::now();
        Message {
            message_id: MessageId::generate(),
            to_agent,
            created_at: now,
            updated_at: now,
            status: MessageStatus::Pending,
            constitutional_validated: false,
            impact_score: None,
            ..self.clone()
        }
    }
}

/// Builder for [`Message`].
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    fn new(from_agent: AgentId, to_agent: AgentId, tenant_id: TenantId) -> Self {
        let now = Utc::now();
        Self {
            message: Message {
                message_id: MessageId::generate(),
                conversation_id: ConversationId::generate(),
                from_agent,
                to_agent,
                tenant_id,
                message_type: MessageType::Command,
                payload: Payload::new(),
                constitutional_hash: String::new(),
                priority: Priority::default(),
                metadata: HashMap::new(),
                created_at: now,
                updated_at: now,
                expires_at: None,
                status: MessageStatus::Pending,
                constitutional_validated: false,
                impact_score: None,
            },
        }
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message.message_type = message_type;
        self
    }

    pub fn conversation(mut self, conversation_id: ConversationId) -> Self {
        self.message.conversation_id = conversation_id;
        self
    }

    pub fn constitutional_hash(mut self, hash: impl Into<String>) -> Self {
        self.message.constitutional_hash = hash.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.message.priority = priority;
        self
    }

    pub fn payload_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.message.payload.insert(key.into(), value);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.message.payload = payload;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.metadata.insert(key.into(), value.into());
        self
    }

    pub fn expires_in(mut self, ttl: std::time::Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());
        self.message.expires_at = Some(self.message.created_at + ttl);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.message.expires_at = Some(at);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::builder("planner", "executor", "tenant-a")
            .constitutional_hash("cdd01ef066bc6cf2")
            .payload_entry("task", serde_json::json!("summarize"))
            .build()
    }

    #[test]
    fn status_moves_forward_only() {
        let mut msg = message();
        msg.transition_to(MessageStatus::Processing).unwrap();
        msg.transition_to(MessageStatus::PendingDeliberation).unwrap();
        msg.transition_to(MessageStatus::Delivered).unwrap();

        assert!(msg.transition_to(MessageStatus::Processing).is_err());
        assert!(msg.transition_to(MessageStatus::Failed).is_err());
        assert_eq!(msg.status(), MessageStatus::Delivered);
    }

    #[test]
    fn deliberation_requires_processing() {
        let mut msg = message();
        assert!(msg.transition_to(MessageStatus::PendingDeliberation).is_err());
        assert_eq!(msg.status(), MessageStatus::Pending);
    }

    #[test]
    fn pending_may_fail_directly() {
        let mut msg = message();
        msg.transition_to(MessageStatus::Failed).unwrap();
        assert!(msg.status().is_terminal());
    }

    #[test]
    fn impact_score_is_set_once() {
        let mut msg = message();
        msg.assign_impact_score(0.4).unwrap();
        assert!(msg.assign_impact_score(0.9).is_err());
        assert_eq!(msg.impact_score(), Some(0.4));
    }

    #[test]
    fn impact_score_rejects_out_of_range() {
        let mut msg = message();
        assert!(msg.assign_impact_score(1.5).is_err());
        assert!(msg.assign_impact_score(f64::NAN).is_err());
        assert_eq!(msg.impact_score(), None);
    }

    #[test]
    fn validation_flag_requires_matching_valid_result() {
        let mut msg = message();

        let wrong = ValidationResult::valid("0000000000000000");
        assert!(msg.mark_constitutionally_validated(&wrong).is_err());

        let invalid = ValidationResult::invalid(&msg.constitutional_hash, vec!["nope".into()]);
        assert!(msg.mark_constitutionally_validated(&invalid).is_err());
        assert!(!msg.is_constitutionally_validated());

        let ok = ValidationResult::valid(&msg.constitutional_hash);
        msg.mark_constitutionally_validated(&ok).unwrap();
        assert!(msg.is_constitutionally_validated());

        // A second verdict is refused.
        assert!(msg.mark_constitutionally_validated(&ok).is_err());
    }

    #[test]
    fn structure_rejects_empty_tenant() {
        let msg = Message::builder("a", "b", "  ")
            .constitutional_hash("cdd01ef066bc6cf2")
            .build();
        match msg.validate_structure() {
            Err(BusError::MessageValidation { problems, .. }) => {
                assert!(problems.iter().any(|p| p.contains("tenant_id")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn deserialization_ignores_caller_supplied_verdicts() {
        let body = serde_json::json!({
            "from_agent": "a",
            "to_agent": "b",
            "tenant_id": "t",
            "message_type": "COMMAND",
            "constitutional_hash": "cdd01ef066bc6cf2",
            "status": "DELIVERED",
            "constitutional_validated": true,
            "impact_score": 0.1
        });
        let msg: Message = serde_json::from_value(body).unwrap();
        assert_eq!(msg.status(), MessageStatus::Pending);
        assert!(!msg.is_constitutionally_validated());
        assert_eq!(msg.impact_score(), None);
        assert_eq!(msg.priority, Priority::Medium);
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let now = Utc::now();
        let msg = Message::builder("a", "b", "t")
            .constitutional_hash("h")
            .expires_at(now)
            .build();
        assert!(msg.is_expired(now));
    }

    #[test]
    fn readdressed_resets_lifecycle() {
        let mut msg = message();
        msg.transition_to(MessageStatus::Processing).unwrap();
        let copy = msg.readdressed(AgentId::new("auditor"));
        assert_ne!(copy.message_id, msg.message_id);
        assert_eq!(copy.conversation_id, msg.conversation_id);
        assert_eq!(copy.status(), MessageStatus::Pending);
        assert_eq!(copy.to_agent.as_str(), "auditor");
    }
}
