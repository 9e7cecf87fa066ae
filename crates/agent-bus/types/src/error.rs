//! Error taxonomy for the Agent Bus.

use thiserror::Error;

use crate::ids::{AgentId, MessageId, TenantId};
use crate::message::MessageStatus;
use crate::role::{AgentRole, RoleAction};

/// Number of characters of a caller-supplied hash echoed back in errors.
const SANITIZED_HASH_LEN: usize = 8;

/// Category of a [`BusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Constitutional,
    Message,
    Agent,
    Policy,
    Deliberation,
    BusOperation,
    Configuration,
    RoleSeparation,
}

/// Errors raised by the bus pipeline.
#[derive(Debug, Error)]
pub enum BusError {
    // ── Constitutional ────────────────────────────────────────────────
    #[error("constitutional hash mismatch: expected {expected}, received {received}")]
    ConstitutionalHashMismatch {
        message_id: Option<MessageId>,
        expected: String,
        /// Already sanitized; see [`sanitize_hash`].
        received: String,
    },

    #[error("constitutional validation failed for message {message_id}: {}", errors.join("; "))]
    ConstitutionalValidation {
        message_id: MessageId,
        errors: Vec<String>,
    },

    // ── Message ───────────────────────────────────────────────────────
    #[error("message {message_id} is structurally invalid: {}", problems.join("; "))]
    MessageValidation {
        message_id: MessageId,
        problems: Vec<String>,
    },

    #[error("delivery of message {message_id} failed: {reason}")]
    MessageDelivery { message_id: MessageId, reason: String },

    #[error("message {message_id} exceeded timeout of {timeout_ms}ms")]
    MessageTimeout { message_id: MessageId, timeout_ms: u64 },

    #[error("message {message_id} expired before processing")]
    MessageExpired { message_id: MessageId },

    #[error("routing error: {0}")]
    Routing(String),

    #[error("message {message_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        message_id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    // ── Agent ─────────────────────────────────────────────────────────
    #[error("agent {agent_id} is not registered in tenant {tenant_id}")]
    AgentNotRegistered { agent_id: AgentId, tenant_id: TenantId },

    #[error("agent {agent_id} is already registered in tenant {tenant_id}")]
    AgentAlreadyRegistered { agent_id: AgentId, tenant_id: TenantId },

    #[error("agent {agent_id} lacks capability {capability}")]
    AgentCapabilityMissing { agent_id: AgentId, capability: String },

    // ── Policy ────────────────────────────────────────────────────────
    #[error("policy evaluation failed: {0}")]
    PolicyEvaluation(String),

    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    #[error("policy engine {engine} unreachable: {reason}")]
    PolicyEngineUnavailable { engine: String, reason: String },

    #[error("policy registry not initialized")]
    PolicyNotInitialized,

    // ── Deliberation ──────────────────────────────────────────────────
    #[error("deliberation for message {message_id} timed out after {timeout_ms}ms")]
    DeliberationTimeout { message_id: MessageId, timeout_ms: u64 },

    #[error("signature collection failed: {0}")]
    SignatureCollection(String),

    #[error("review consensus not reached: {0}")]
    ReviewConsensus(String),

    // ── Bus operation ─────────────────────────────────────────────────
    #[error("message bus is not started")]
    BusNotStarted,

    #[error("message bus is already started")]
    BusAlreadyStarted,

    #[error("handler {handler} failed: {reason}")]
    HandlerExecution { handler: String, reason: String },

    #[error("dependency {dependency} is unavailable (circuit open)")]
    DependencyUnavailable { dependency: String },

    // ── Configuration ─────────────────────────────────────────────────
    #[error("invalid configuration for {key}: {reason}")]
    Configuration { key: String, reason: String },

    // ── Role separation ───────────────────────────────────────────────
    #[error("agent {agent_id} ({role}) may not {action}")]
    RoleViolation {
        agent_id: AgentId,
        role: RoleLabel,
        action: RoleAction,
    },

    #[error("agent {agent_id} attempted to validate its own output")]
    SelfValidation { agent_id: AgentId },
}

/// Role shown in a role violation; agents may be registered without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleLabel(pub Option<AgentRole>);

impl std::fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(role) => write!(f, "{role}"),
            None => f.write_str("no role"),
        }
    }
}

impl BusError {
    /// Hash mismatch with the received value sanitized.
    pub fn hash_mismatch(
        message_id: Option<MessageId>,
        expected: impl Into<String>,
        received: &str,
    ) -> Self {
        BusError::ConstitutionalHashMismatch {
            message_id,
            expected: expected.into(),
            received: sanitize_hash(received),
        }
    }

    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::ConstitutionalHashMismatch { .. }
            | BusError::ConstitutionalValidation { .. } => ErrorKind::Constitutional,

            BusError::MessageValidation { .. }
            | BusError::MessageDelivery { .. }
            | BusError::MessageTimeout { .. }
            | BusError::MessageExpired { .. }
            | BusError::Routing(_)
            | BusError::InvalidStatusTransition { .. } => ErrorKind::Message,

            BusError::AgentNotRegistered { .. }
            | BusError::AgentAlreadyRegistered { .. }
            | BusError::AgentCapabilityMissing { .. } => ErrorKind::Agent,

            BusError::PolicyEvaluation(_)
            | BusError::PolicyNotFound(_)
            | BusError::PolicyEngineUnavailable { .. }
            | BusError::PolicyNotInitialized => ErrorKind::Policy,

            BusError::DeliberationTimeout { .. }
            | BusError::SignatureCollection(_)
            | BusError::ReviewConsensus(_) => ErrorKind::Deliberation,

            BusError::BusNotStarted
            | BusError::BusAlreadyStarted
            | BusError::HandlerExecution { .. }
            | BusError::DependencyUnavailable { .. } => ErrorKind::BusOperation,

            BusError::Configuration { .. } => ErrorKind::Configuration,

            BusError::RoleViolation { .. } | BusError::SelfValidation { .. } => {
                ErrorKind::RoleSeparation
            }
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            BusError::ConstitutionalHashMismatch { .. } => "CONSTITUTIONAL_HASH_MISMATCH",
            BusError::ConstitutionalValidation { .. } => "CONSTITUTIONAL_VALIDATION_FAILED",
            BusError::MessageValidation { .. } => "MESSAGE_VALIDATION_FAILED",
            BusError::MessageDelivery { .. } => "MESSAGE_DELIVERY_FAILED",
            BusError::MessageTimeout { .. } => "MESSAGE_TIMEOUT",
            BusError::MessageExpired { .. } => "MESSAGE_EXPIRED",
            BusError::Routing(_) => "ROUTING_ERROR",
            BusError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            BusError::AgentNotRegistered { .. } => "AGENT_NOT_REGISTERED",
            BusError::AgentAlreadyRegistered { .. } => "AGENT_ALREADY_REGISTERED",
            BusError::AgentCapabilityMissing { .. } => "AGENT_CAPABILITY_MISSING",
            BusError::PolicyEvaluation(_) => "POLICY_EVALUATION_FAILED",
            BusError::PolicyNotFound(_) => "POLICY_NOT_FOUND",
            BusError::PolicyEngineUnavailable { .. } => "POLICY_ENGINE_UNAVAILABLE",
            BusError::PolicyNotInitialized => "POLICY_NOT_INITIALIZED",
            BusError::DeliberationTimeout { .. } => "DELIBERATION_TIMEOUT",
            BusError::SignatureCollection(_) => "SIGNATURE_COLLECTION_FAILED",
            BusError::ReviewConsensus(_) => "REVIEW_CONSENSUS_FAILED",
            BusError::BusNotStarted => "BUS_NOT_STARTED",
            BusError::BusAlreadyStarted => "BUS_ALREADY_STARTED",
            BusError::HandlerExecution { .. } => "HANDLER_EXECUTION_FAILED",
            BusError::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
            BusError::Configuration { .. } => "CONFIGURATION_ERROR",
            BusError::RoleViolation { .. } => "ROLE_VIOLATION",
            BusError::SelfValidation { .. } => "SELF_VALIDATION_FORBIDDEN",
        }
    }

    /// Transient failures of an external dependency. Everything else is a
    /// verdict and must not be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::PolicyEngineUnavailable { .. }
                | BusError::DependencyUnavailable { .. }
                | BusError::MessageTimeout { .. }
                | BusError::DeliberationTimeout { .. }
        )
    }

    /// Whether the failure came from an unreachable collaborator rather
    /// than from a verdict.
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            BusError::PolicyEngineUnavailable { .. }
                | BusError::DependencyUnavailable { .. }
                | BusError::PolicyNotInitialized
        )
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Reduce a caller-supplied hash to a short alphanumeric prefix so error
/// payloads never echo arbitrary input.
pub fn sanitize_hash(received: &str) -> String {
    let cleaned: String = received
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if cleaned.is_empty() {
        return "<empty>".to_string();
    }
    if cleaned.len() > SANITIZED_HASH_LEN {
        format!("{}...", &cleaned[..SANITIZED_HASH_LEN])
    } else {
        cleaned
    }
}
