//! API Router configuration

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let router = Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/health/history", get(handlers::health_history))
        .route("/metrics", get(handlers::metrics))
        // Messages
        .route("/messages", post(handlers::send_message))
        .route("/messages/broadcast", post(handlers::broadcast_message))
        .route("/messages/:id/deliberation", get(handlers::get_deliberation))
        // Agents
        .route("/agents", post(handlers::register_agent))
        .route("/agents/:tenant_id", get(handlers::list_agents))
        .route("/agents/:tenant_id/:agent_id", get(handlers::get_agent))
        .route("/agents/:tenant_id/:agent_id", delete(handlers::unregister_agent))
        // Chaos
        .route("/chaos/scenarios", get(handlers::list_scenarios))
        .route("/chaos/scenarios/:id", delete(handlers::deactivate_scenario))
        .route("/chaos/latency", post(handlers::inject_latency))
        .route("/chaos/errors", post(handlers::inject_errors))
        .route("/chaos/circuit-open", post(handlers::force_circuit_open))
        .route("/chaos/exhaustion", post(handlers::simulate_exhaustion))
        .route("/chaos/emergency-stop", post(handlers::emergency_stop))
        .route("/chaos/reset", post(handlers::reset_emergency_stop))
        // Recovery
        .route("/recovery", get(handlers::list_recoveries))
        .route("/recovery/:service", get(handlers::get_recovery))
        .route("/recovery/:service", post(handlers::schedule_recovery))
        .route("/recovery/:service", delete(handlers::cancel_recovery))
        .route("/recovery/:service/manual", post(handlers::complete_manual_recovery))
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if server.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
