//! Recovery orchestration handlers

use agent_bus_resilience::{RecoveryState, RecoveryStatus};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleRequest {
    /// Lower is served first; defaults to the configured priority.
    pub priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ManualCompletion {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualCompletionResponse {
    pub service_name: String,
    pub state: RecoveryState,
}

pub async fn list_recoveries(State(state): State<AppState>) -> Json<Vec<RecoveryStatus>> {
    Json(state.bus.recovery().list_recoveries())
}

pub async fn get_recovery(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<Json<RecoveryStatus>> {
    state
        .bus
        .recovery()
        .get_recovery_status(&service)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no recovery for service {service}")))
}

pub async fn schedule_recovery(
    State(state): State<AppState>,
    Path(service): Path<String>,
    body: Option<Json<ScheduleRequest>>,
) -> ApiResult<Json<RecoveryStatus>> {
    let recovery = state.bus.recovery();
    let priority = body
        .and_then(|Json(req)| req.priority)
        .unwrap_or(recovery.config().default_priority);
    let status = recovery.schedule_recovery(&service, priority, None)?;
    Ok(Json(status))
}

pub async fn cancel_recovery(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<Json<RecoveryStatus>> {
    let status = state.bus.recovery().cancel_recovery(&service)?;
    Ok(Json(status))
}

/// Resolve a recovery waiting on an operator
pub async fn complete_manual_recovery(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(req): Json<ManualCompletion>,
) -> ApiResult<Json<ManualCompletionResponse>> {
    let outcome = state
        .bus
        .recovery()
        .complete_manual_recovery(&service, req.success)?;
    Ok(Json(ManualCompletionResponse {
        service_name: service,
        state: outcome,
    }))
}
