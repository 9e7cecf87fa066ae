//! Error types for agent-bus-daemon

use agent_bus_resilience::ResilienceError;
use agent_bus_types::{BusError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Bus lifecycle error
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Error raised by the message bus
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Error raised by health, recovery or chaos operations
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    /// HTTP status and stable error code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Bus(err) => (bus_status(err), err.error_code()),
            ApiError::Resilience(err) => resilience_status(err),
        }
    }
}

fn bus_status(err: &BusError) -> StatusCode {
    if err.is_unavailability() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match err {
        BusError::MessageValidation { .. } | BusError::InvalidStatusTransition { .. } => {
            StatusCode::BAD_REQUEST
        }
        BusError::MessageExpired { .. } => StatusCode::GONE,
        BusError::MessageTimeout { .. } | BusError::DeliberationTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        BusError::MessageDelivery { .. } | BusError::HandlerExecution { .. } => {
            StatusCode::BAD_GATEWAY
        }
        BusError::AgentNotRegistered { .. } | BusError::PolicyNotFound(_) => StatusCode::NOT_FOUND,
        BusError::AgentAlreadyRegistered { .. } | BusError::BusAlreadyStarted => StatusCode::CONFLICT,
        BusError::AgentCapabilityMissing { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BusError::BusNotStarted
        | BusError::DependencyUnavailable { .. }
        | BusError::PolicyEngineUnavailable { .. }
        | BusError::PolicyNotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        _ => match err.kind() {
            ErrorKind::Constitutional | ErrorKind::RoleSeparation | ErrorKind::Policy => {
                StatusCode::FORBIDDEN
            }
            ErrorKind::Message => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn resilience_status(err: &ResilienceError) -> (StatusCode, &'static str) {
    match err {
        ResilienceError::BreakerNotFound(_) => (StatusCode::NOT_FOUND, "BREAKER_NOT_FOUND"),
        ResilienceError::RecoveryNotActive(_) => (StatusCode::NOT_FOUND, "RECOVERY_NOT_ACTIVE"),
        ResilienceError::RecoveryAlreadyActive(_) => (StatusCode::CONFLICT, "RECOVERY_ALREADY_ACTIVE"),
        ResilienceError::RecoveryInProgress(_) => (StatusCode::CONFLICT, "RECOVERY_IN_PROGRESS"),
        ResilienceError::NotAwaitingManual(_) => (StatusCode::CONFLICT, "NOT_AWAITING_MANUAL"),
        ResilienceError::AlreadyRunning(_) => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
        ResilienceError::ChaosDisabled => (StatusCode::FORBIDDEN, "CHAOS_DISABLED"),
        ResilienceError::EmergencyStopActive => (StatusCode::CONFLICT, "EMERGENCY_STOP_ACTIVE"),
        ResilienceError::DurationExceeded { .. } => (StatusCode::BAD_REQUEST, "CHAOS_DURATION_EXCEEDED"),
        ResilienceError::InvalidScenario(_) => (StatusCode::BAD_REQUEST, "INVALID_CHAOS_SCENARIO"),
        ResilienceError::Configuration(_) => (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR"),
        ResilienceError::InjectedFault { .. } => (StatusCode::SERVICE_UNAVAILABLE, "INJECTED_FAULT"),
        ResilienceError::Listener(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LISTENER_FAILED"),
    }
}

/// Structured context for a bus error. Hashes in mismatch errors are
/// already sanitized.
fn bus_details(err: &BusError) -> Value {
    let mut details = json!({
        "kind": format!("{:?}", err.kind()),
        "retryable": err.is_retryable(),
    });
    let extra = match err {
        BusError::ConstitutionalHashMismatch {
            message_id,
            expected,
            received,
        } => json!({ "message_id": message_id, "expected": expected, "received": received }),
        BusError::ConstitutionalValidation { message_id, errors } => {
            json!({ "message_id": message_id, "errors": errors })
        }
        BusError::MessageValidation {
            message_id,
            problems,
        } => json!({ "message_id": message_id, "problems": problems }),
        BusError::MessageTimeout {
            message_id,
            timeout_ms,
        }
        | BusError::DeliberationTimeout {
            message_id,
            timeout_ms,
        } => json!({ "message_id": message_id, "timeout_ms": timeout_ms }),
        BusError::MessageExpired { message_id } => json!({ "message_id": message_id }),
        BusError::MessageDelivery { message_id, .. } => json!({ "message_id": message_id }),
        BusError::AgentNotRegistered {
            agent_id,
            tenant_id,
        }
        | BusError::AgentAlreadyRegistered {
            agent_id,
            tenant_id,
        } => json!({ "agent_id": agent_id, "tenant_id": tenant_id }),
        BusError::AgentCapabilityMissing {
            agent_id,
            capability,
        } => json!({ "agent_id": agent_id, "capability": capability }),
        BusError::DependencyUnavailable { dependency } => json!({ "dependency": dependency }),
        BusError::PolicyEngineUnavailable { engine, .. } => json!({ "engine": engine }),
        BusError::RoleViolation {
            agent_id, action, ..
        } => json!({ "agent_id": agent_id, "action": action }),
        BusError::SelfValidation { agent_id } => json!({ "agent_id": agent_id }),
        _ => Value::Null,
    };
    if let (Value::Object(base), Value::Object(extra)) = (&mut details, extra) {
        base.extend(extra);
    }
    details
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let details = match &self {
            ApiError::Bus(err) => Some(bus_details(err)),
            _ => None,
        };

        if status.is_server_error() {
            tracing::warn!(error_code = code, error = %self, "Request failed");
        } else {
            tracing::debug!(error_code = code, error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus_types::{AgentId, MessageId, TenantId};

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_bus_error_status_codes() {
        let mismatch = BusError::hash_mismatch(None, "cdd01ef066bc6cf2", "bogus");
        assert_eq!(ApiError::from(mismatch).status_and_code().0, StatusCode::FORBIDDEN);

        let missing = BusError::AgentNotRegistered {
            agent_id: AgentId::new("ghost"),
            tenant_id: TenantId::new("t"),
        };
        assert_eq!(
            ApiError::from(missing).status_and_code(),
            (StatusCode::NOT_FOUND, "AGENT_NOT_REGISTERED")
        );

        let timeout = BusError::MessageTimeout {
            message_id: MessageId::generate(),
            timeout_ms: 10,
        };
        assert_eq!(ApiError::from(timeout).status_and_code().0, StatusCode::GATEWAY_TIMEOUT);

        assert_eq!(
            ApiError::from(BusError::BusNotStarted).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_hash_mismatch_details_are_sanitized() {
        let err = BusError::hash_mismatch(None, "cdd01ef066bc6cf2", "<script>alert(1)</script>");
        let details = bus_details(&err);
        assert_eq!(details["received"], "scriptal...");
        assert_eq!(details["kind"], "Constitutional");
        assert_eq!(details["retryable"], false);
    }

    #[test]
    fn test_resilience_error_status_codes() {
        assert_eq!(
            ApiError::from(ResilienceError::EmergencyStopActive).status_and_code(),
            (StatusCode::CONFLICT, "EMERGENCY_STOP_ACTIVE")
        );
        assert_eq!(
            ApiError::from(ResilienceError::RecoveryNotActive("x".into()))
                .status_and_code()
                .0,
            StatusCode::NOT_FOUND
        );
    }
}
