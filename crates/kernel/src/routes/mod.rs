//! HTTP route handlers.

pub mod content;
pub mod files;
pub mod health;
pub mod helpers;
pub mod metrics;

use axum::Router;

use crate::state::AppState;

/// All routes, without middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(content::router())
        .merge(files::router())
        .merge(health::router())
        .merge(metrics::router())
}
