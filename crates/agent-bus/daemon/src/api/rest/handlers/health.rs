//! Health and metrics handlers

use agent_bus_core::BusHealthStatus;
use agent_bus_resilience::HealthSnapshot;
use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    #[serde(flatten)]
    pub health: BusHealthStatus,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint. Always answers, even while the bus is stopped.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        health: state.bus.get_health_status(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub window_minutes: Option<u64>,
}

/// Health snapshots within the requested window, oldest first
pub async fn health_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HealthSnapshot>> {
    let window = query
        .window_minutes
        .unwrap_or(state.bus.config().health.history_window_minutes);
    Json(state.bus.health().get_health_history(window))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .bus
        .render_metrics()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
