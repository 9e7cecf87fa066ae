//! Chaos injection handlers
//!
//! Every injection is bounded by its duration and undone by
//! `POST /chaos/emergency-stop`.

use std::collections::BTreeSet;

use agent_bus_resilience::ChaosScenario;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct LatencyRequest {
    pub target: String,
    pub delay_ms: u64,
    pub duration_s: f64,
    #[serde(default)]
    pub blast_radius: Option<BTreeSet<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorsRequest {
    pub target: String,
    pub error_rate: f64,
    #[serde(default = "default_error_type")]
    pub error_type: String,
    pub duration_s: f64,
    #[serde(default)]
    pub blast_radius: Option<BTreeSet<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CircuitOpenRequest {
    pub breaker: String,
    pub duration_s: f64,
}

#[derive(Debug, Deserialize)]
pub struct ExhaustionRequest {
    pub target: String,
    pub resource: String,
    pub level: f64,
    pub duration_s: f64,
    #[serde(default)]
    pub blast_radius: Option<BTreeSet<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmergencyStopResponse {
    pub deactivated: usize,
}

fn default_error_type() -> String {
    "injected".to_string()
}

type Created = (StatusCode, Json<ChaosScenario>);

pub async fn inject_latency(
    State(state): State<AppState>,
    Json(req): Json<LatencyRequest>,
) -> ApiResult<Created> {
    let scenario = state
        .bus
        .chaos()
        .inject_latency(&req.target, req.delay_ms, req.duration_s, req.blast_radius)
        .await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

pub async fn inject_errors(
    State(state): State<AppState>,
    Json(req): Json<ErrorsRequest>,
) -> ApiResult<Created> {
    let scenario = state
        .bus
        .chaos()
        .inject_errors(
            &req.target,
            req.error_rate,
            &req.error_type,
            req.duration_s,
            req.blast_radius,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

pub async fn force_circuit_open(
    State(state): State<AppState>,
    Json(req): Json<CircuitOpenRequest>,
) -> ApiResult<Created> {
    if state.bus.circuit_breaker(&req.breaker).is_none() {
        return Err(ApiError::NotFound(format!("circuit breaker {}", req.breaker)));
    }
    let scenario = state
        .bus
        .chaos()
        .force_circuit_open(&req.breaker, req.duration_s)
        .await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

pub async fn simulate_exhaustion(
    State(state): State<AppState>,
    Json(req): Json<ExhaustionRequest>,
) -> ApiResult<Created> {
    let scenario = state
        .bus
        .chaos()
        .simulate_resource_exhaustion(
            &req.target,
            &req.resource,
            req.level,
            req.duration_s,
            req.blast_radius,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

pub async fn list_scenarios(State(state): State<AppState>) -> Json<Vec<ChaosScenario>> {
    Json(state.bus.chaos().active_scenarios())
}

pub async fn deactivate_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    // Already inactive is still a success.
    state.bus.chaos().deactivate_scenario(id);
    StatusCode::NO_CONTENT
}

/// Deactivate every scenario and refuse injections until reset
pub async fn emergency_stop(State(state): State<AppState>) -> Json<EmergencyStopResponse> {
    let deactivated = state.bus.chaos().emergency_stop();
    tracing::warn!(deactivated, "Chaos emergency stop via API");
    Json(EmergencyStopResponse { deactivated })
}

pub async fn reset_emergency_stop(State(state): State<AppState>) -> StatusCode {
    state.bus.chaos().reset_emergency_stop();
    StatusCode::NO_CONTENT
}
