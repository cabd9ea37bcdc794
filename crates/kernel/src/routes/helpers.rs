//! Shared route helpers.

use axum::extract::FromRequestParts;
use axum::extract::multipart::Field;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::coordinator::ImageFile;
use crate::error::{AppError, ContentError};
use crate::image::MAX_IMAGE_SIZE;
use crate::models::{Actor, Role};

/// Header carrying the authenticated user id, set by the auth gateway.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Header carrying the authenticated user's role.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Language assumed for code submitted without one.
pub const DEFAULT_CODE_LANGUAGE: &str = "javascript";

/// Request body limit for content forms: one full-size image plus the
/// text and code fields around it.
pub const MAX_FORM_SIZE: usize = MAX_IMAGE_SIZE + 1024 * 1024;

/// The acting user, taken from gateway headers.
///
/// A missing or malformed id is rejected with 401. An unknown role falls
/// back to [`Role::Member`].
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AppError::Unauthorized)?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .unwrap_or_default();

        Ok(CurrentActor(Actor::with_role(id, role)))
    }
}

/// Read an uploaded image field.
pub async fn read_image_field(field: Field<'_>) -> Result<ImageFile, AppError> {
    let filename = field.file_name().unwrap_or("image").to_string();
    let mime_type = field
        .content_type()
        .map(|s| s.to_string())
        .or_else(|| guess_mime_type(&filename))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read image data: {e}")))?;

    // Check size limit early
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ContentError::validation(format!(
            "image too large: {} bytes (max {MAX_IMAGE_SIZE} bytes)",
            bytes.len()
        ))
        .into());
    }

    Ok(ImageFile::new(bytes.to_vec(), mime_type, filename))
}

/// Read a text field.
pub async fn read_text_field(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read form field: {e}")))
}

/// Whether a form flag such as `clear_image` is switched on.
pub fn is_flag_set(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Guess MIME type from a filename extension.
fn guess_mime_type(filename: &str) -> Option<String> {
    let ext = filename.rsplit('.').next()?.to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Parse a comma-separated list of UUIDs.
pub fn parse_id_list(raw: &str) -> Result<Vec<Uuid>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| AppError::BadRequest(format!("invalid id: {s}")))
        })
        .collect()
}
