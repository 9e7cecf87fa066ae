//! Agent registry handlers

use agent_bus_core::{AgentRecord, AgentRegistration};
use agent_bus_types::{AgentId, TenantId};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};

/// Register an agent in its tenant
pub async fn register_agent(
    State(state): State<AppState>,
    body: Result<Json<AgentRegistration>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AgentRecord>)> {
    let Json(registration) = body.map_err(|r| ApiError::BadRequest(r.body_text()))?;
    let record = state.bus.register_agent(registration)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_agents(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Vec<AgentRecord>>> {
    let agents = state.bus.list_agents(&TenantId::new(tenant_id))?;
    Ok(Json(agents))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path((tenant_id, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<AgentRecord>> {
    let record = state
        .bus
        .get_agent(&TenantId::new(tenant_id), &AgentId::new(agent_id))?;
    Ok(Json(record))
}

pub async fn unregister_agent(
    State(state): State<AppState>,
    Path((tenant_id, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<AgentRecord>> {
    let record = state
        .bus
        .unregister_agent(&TenantId::new(tenant_id), &AgentId::new(agent_id))?;
    Ok(Json(record))
}
