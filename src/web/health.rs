//! Liveness and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::state::{AppState, ServiceStatus};

#[derive(Serialize)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    database: bool,
    services: Vec<ServiceInfo>,
}

/// `GET /health`: liveness only, no database round-trip.
pub async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({ "status": "healthy" }))
}

/// `GET /status`: database reachability plus build info and component statuses.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let database = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();

    let services = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status)| ServiceInfo { name, status })
        .collect::<Vec<_>>();

    let overall = if !database || services.iter().any(|s| s.status == ServiceStatus::Error) {
        ServiceStatus::Error
    } else {
        ServiceStatus::Active
    };

    Json(StatusResponse {
        status: overall,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_SHORT").to_string(),
        database,
        services,
    })
}
