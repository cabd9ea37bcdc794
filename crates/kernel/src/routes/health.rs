//! Health check endpoint.
//!
//! Returns 200 OK if both PostgreSQL and Redis are reachable,
//! 503 Service Unavailable otherwise. Orphan cleanup failures are reported
//! but do not affect the status.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    postgres: bool,
    redis: bool,
    /// Background cleanup and emission tasks in flight.
    pending_tasks: usize,
    /// Failed attachment deletes awaiting remediation.
    orphan_cleanup_failures: usize,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (postgres, redis) = tokio::join!(state.postgres_healthy(), state.redis_healthy());
    let healthy = postgres && redis;

    let coordinator = state.coordinator();
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        postgres,
        redis,
        pending_tasks: coordinator.pending_tasks(),
        orphan_cleanup_failures: coordinator.cleanup_ledger().len(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(body))
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
