//! Prometheus metrics and cleanup ledger endpoints.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::coordinator::OrphanCleanupFailure;
use crate::state::AppState;

/// Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/metrics/orphans", get(orphans))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let output = state.metrics().encode();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        output,
    )
        .into_response()
}

/// Attachments whose best-effort delete failed, oldest first.
///
/// The ledger is left intact; remediation tooling drains it.
async fn orphans(State(state): State<AppState>) -> Json<Vec<OrphanCleanupFailure>> {
    Json(state.coordinator().cleanup_ledger().snapshot())
}
