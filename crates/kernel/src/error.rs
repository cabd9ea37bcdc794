//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ContentKind;

/// Failure of a coordinator operation, as reported to the caller.
///
/// Cleanup failures never appear here; they are recorded in the
/// coordinator's cleanup ledger instead.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Input rejected before any store was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Document store or object store write failed.
    #[error("{store} upload failed")]
    Upload {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Relational store failed.
    #[error("relational store operation failed")]
    Persistence(#[source] anyhow::Error),

    /// Target row does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: ContentKind, id: Uuid },

    /// Actor is neither the author nor privileged.
    #[error("actor {actor} may not modify {kind} {id}")]
    PermissionDenied {
        actor: Uuid,
        kind: ContentKind,
        id: Uuid,
    },
}

impl ContentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ContentError::Validation(msg.into())
    }

    pub(crate) fn code_upload(source: anyhow::Error) -> Self {
        ContentError::Upload {
            store: "code snippet",
            source,
        }
    }

    pub(crate) fn image_upload(source: anyhow::Error) -> Self {
        ContentError::Upload {
            store: "image",
            source,
        }
    }

    /// Short label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ContentError::Validation(_) => "validation",
            ContentError::Upload { .. } => "upload_failure",
            ContentError::Persistence(_) => "persistence_failure",
            ContentError::NotFound { .. } => "not_found",
            ContentError::PermissionDenied { .. } => "permission_denied",
        }
    }
}

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Content(e) => match e {
                ContentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ContentError::Upload { .. } => StatusCode::BAD_GATEWAY,
                ContentError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ContentError::NotFound { .. } => StatusCode::NOT_FOUND,
                ContentError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            },
        };

        // Store failures stay vague for the client; details go to the log
        let error = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            AppError::Content(ContentError::Upload { source, .. }) => {
                tracing::error!(error = %source, "upload failure");
                self.to_string()
            }
            AppError::Content(ContentError::Persistence(source)) => {
                tracing::error!(error = %source, "persistence failure");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
