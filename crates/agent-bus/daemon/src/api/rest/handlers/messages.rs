//! Message handlers

use agent_bus_core::{BroadcastReport, DeliberationRecord, RoutingPath};
use agent_bus_types::{Message, MessageId, MessageStatus};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct SendQuery {
    /// Overrides the bus default deadline.
    pub timeout_ms: Option<u64>,
}

/// Send response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub path: RoutingPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Message>,
}

fn message_body(body: Result<Json<Message>, JsonRejection>) -> ApiResult<Message> {
    body.map(|Json(message)| message)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Validate, route and deliver one message.
///
/// Answers `202 Accepted` when the message was handed to deliberation and
/// `200 OK` when it was delivered.
pub async fn send_message(
    State(state): State<AppState>,
    Query(query): Query<SendQuery>,
    body: Result<Json<Message>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SendMessageResponse>)> {
    let message = message_body(body)?;
    let receipt = state.bus.send_message(message, query.timeout_ms).await?;

    let status = match receipt.status {
        MessageStatus::PendingDeliberation => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };

    Ok((
        status,
        Json(SendMessageResponse {
            message_id: receipt.message_id,
            status: receipt.status,
            timestamp: receipt.timestamp,
            path: receipt.path,
            impact_score: receipt.impact_score,
            response: receipt.response,
        }),
    ))
}

/// Deliver to every agent in the sender's tenant except the sender
pub async fn broadcast_message(
    State(state): State<AppState>,
    Query(query): Query<SendQuery>,
    body: Result<Json<Message>, JsonRejection>,
) -> ApiResult<Json<BroadcastReport>> {
    let message = message_body(body)?;
    let report = state.bus.broadcast_message(message, query.timeout_ms).await?;
    Ok(Json(report))
}

/// Outcome of a message routed to deliberation
pub async fn get_deliberation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliberationRecord>> {
    let message_id = MessageId::from_uuid(id);
    state
        .bus
        .deliberation_outcome(&message_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no deliberation for message {message_id}")))
}
