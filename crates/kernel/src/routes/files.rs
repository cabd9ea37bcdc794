//! Serving of locally stored images.

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::fs;
use tracing::warn;

use crate::state::AppState;

/// Create the files router.
pub fn router() -> Router<AppState> {
    Router::new().route("/files/{*path}", get(serve_file))
}

async fn serve_file(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let Some(uploads_dir) = state.uploads_dir() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = path.trim_start_matches('/');
    if path.split('/').any(|segment| segment == ".." || segment.is_empty()) || path.contains('\0')
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    let file_path = uploads_dir.join(path);
    let content = match fs::read(&file_path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %file_path.display(), error = %e, "failed to read uploaded image");
            }
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let content_type = infer::get(&content)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        Body::from(content),
    )
        .into_response()
}
