//! Post and comment endpoints.
//!
//! Thin handlers over the coordinator (writes) and the read aggregator
//! (reads). Creates take `multipart/form-data` with optional `body`,
//! `code`, `language` and `image` fields. Updates take the same form plus
//! `clear_code` / `clear_image` flags, or JSON when no new image is sent.
//! The `image` sub-resource replaces just the image.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    routing::{get, patch, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::PostDetails;
use crate::coordinator::{ContentInput, ContentUpdate, DeleteOutcome, ImageFile};
use crate::error::{AppError, AppResult, ContentError};
use crate::models::{CodePayload, ContentKind, ContentRef, Patch, ResolvedComment, ResolvedPost};
use crate::routes::helpers::{
    CurrentActor, DEFAULT_CODE_LANGUAGE, MAX_FORM_SIZE, is_flag_set, parse_id_list,
    read_image_field, read_text_field,
};
use crate::state::AppState;

/// Create the content router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/projects/{project_id}/posts",
            get(list_posts).post(create_post),
        )
        .route(
            "/api/posts/{id}",
            get(post_details).patch(update_post).delete(delete_post),
        )
        .route("/api/posts/{id}/image", put(replace_post_image))
        .route(
            "/api/posts/{id}/comments",
            get(list_post_comments).post(create_comment),
        )
        .route("/api/comments", get(list_comments))
        .route(
            "/api/comments/{id}",
            patch(update_comment).delete(delete_comment),
        )
        .route("/api/comments/{id}/image", put(replace_comment_image))
        .layer(DefaultBodyLimit::max(MAX_FORM_SIZE))
}

/// JSON body for text and code edits.
///
/// An absent `code` keeps the snippet and `null` removes it. `image` only
/// accepts `null`, which removes the image.
#[derive(Debug, Deserialize)]
struct UpdateRequest {
    body: Option<String>,
    #[serde(default)]
    code: Patch<CodePayload>,
    #[serde(default)]
    image: Patch<serde_json::Value>,
}

impl TryFrom<UpdateRequest> for ContentUpdate {
    type Error = AppError;

    fn try_from(request: UpdateRequest) -> Result<Self, Self::Error> {
        let image = match request.image {
            Patch::Keep => Patch::Keep,
            Patch::Clear => Patch::Clear,
            Patch::Set(_) => {
                return Err(AppError::BadRequest(
                    "new images are sent as multipart form data".to_string(),
                ));
            }
        };
        Ok(ContentUpdate {
            body: request.body,
            code: request.code,
            image,
        })
    }
}

/// An update in either encoding.
///
/// `multipart/form-data` bodies go through [`read_update_form`]; anything
/// else is read as an [`UpdateRequest`].
struct UpdateForm(ContentUpdate);

impl<S: Send + Sync> FromRequest<S> for UpdateForm {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return read_update_form(multipart).await.map(UpdateForm);
        }

        let Json(request) = Json::<UpdateRequest>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        ContentUpdate::try_from(request).map(UpdateForm)
    }
}

#[derive(Debug, Deserialize)]
struct CommentsQuery {
    /// Comma-separated post ids.
    post_ids: String,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    rows_deleted: usize,
    cleanup_scheduled: usize,
}

impl From<DeleteOutcome> for DeleteResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        Self {
            rows_deleted: outcome.rows_deleted,
            cleanup_scheduled: outcome.cleanup_scheduled,
        }
    }
}

/// Create a post.
///
/// POST /api/projects/{project_id}/posts
async fn create_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ResolvedPost>)> {
    let input = read_content_form(multipart).await?;
    let post = state
        .coordinator()
        .create_post(&actor, project_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// List a project's posts, newest first.
///
/// GET /api/projects/{project_id}/posts
async fn list_posts(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<ResolvedPost>>> {
    Ok(Json(state.aggregator().list_posts(project_id).await?))
}

/// A post with its comments.
///
/// GET /api/posts/{id}
async fn post_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PostDetails>> {
    state
        .aggregator()
        .post_details(id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ContentError::NotFound {
                kind: ContentKind::Post,
                id,
            }
            .into()
        })
}

/// PATCH /api/posts/{id}
async fn update_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    UpdateForm(update): UpdateForm,
) -> AppResult<Json<ResolvedPost>> {
    Ok(Json(state.coordinator().update_post(&actor, id, update).await?))
}

/// PUT /api/posts/{id}/image
async fn replace_post_image(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<ResolvedPost>> {
    let update = read_image_form(multipart).await?;
    Ok(Json(state.coordinator().update_post(&actor, id, update).await?))
}

/// Delete a post and all its comments.
///
/// DELETE /api/posts/{id}
async fn delete_post(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    let outcome = state
        .coordinator()
        .delete(&actor, ContentRef::post(id))
        .await?;
    Ok(Json(outcome.into()))
}

/// POST /api/posts/{id}/comments
async fn create_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(post_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ResolvedComment>)> {
    let input = read_content_form(multipart).await?;
    let comment = state
        .coordinator()
        .create_comment(&actor, post_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /api/posts/{id}/comments
async fn list_post_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> AppResult<Json<Vec<ResolvedComment>>> {
    Ok(Json(state.aggregator().list_comments(&[post_id]).await?))
}

/// Comments of several posts in one request.
///
/// GET /api/comments?post_ids=a,b,c
async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<CommentsQuery>,
) -> AppResult<Json<Vec<ResolvedComment>>> {
    let post_ids = parse_id_list(&query.post_ids)?;
    Ok(Json(state.aggregator().list_comments(&post_ids).await?))
}

/// PATCH /api/comments/{id}
async fn update_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    UpdateForm(update): UpdateForm,
) -> AppResult<Json<ResolvedComment>> {
    Ok(Json(
        state.coordinator().update_comment(&actor, id, update).await?,
    ))
}

/// PUT /api/comments/{id}/image
async fn replace_comment_image(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<ResolvedComment>> {
    let update = read_image_form(multipart).await?;
    Ok(Json(
        state.coordinator().update_comment(&actor, id, update).await?,
    ))
}

/// DELETE /api/comments/{id}
async fn delete_comment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    let outcome = state
        .coordinator()
        .delete(&actor, ContentRef::comment(id))
        .await?;
    Ok(Json(outcome.into()))
}

/// Parse a create form into coordinator input.
async fn read_content_form(mut multipart: Multipart) -> AppResult<ContentInput> {
    let mut input = ContentInput::default();
    let mut code: Option<String> = None;
    let mut language: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "body" => input.body = read_text_field(field).await?,
            "code" => code = Some(read_text_field(field).await?),
            "language" => language = Some(read_text_field(field).await?),
            "image" => input.image = Some(read_image_field(field).await?),
            _ => {}
        }
    }

    input.code = code.filter(|c| !c.trim().is_empty()).map(|content| {
        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string());
        CodePayload::new(content, language)
    });
    Ok(input)
}

/// Parse an update form.
///
/// A non-empty `code` replaces the snippet and an empty one removes it, as
/// does `clear_code`. `clear_image` removes the image. Sending a value and
/// its clear flag together is rejected.
async fn read_update_form(mut multipart: Multipart) -> AppResult<ContentUpdate> {
    let mut body: Option<String> = None;
    let mut code: Option<String> = None;
    let mut language: Option<String> = None;
    let mut image: Option<ImageFile> = None;
    let mut clear_code = false;
    let mut clear_image = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "body" => body = Some(read_text_field(field).await?),
            "code" => code = Some(read_text_field(field).await?),
            "language" => language = Some(read_text_field(field).await?),
            "image" => image = Some(read_image_field(field).await?),
            "clear_code" => clear_code = is_flag_set(&read_text_field(field).await?),
            "clear_image" => clear_image = is_flag_set(&read_text_field(field).await?),
            _ => {}
        }
    }

    let code = match code {
        Some(content) if !content.trim().is_empty() => {
            if clear_code {
                return Err(AppError::BadRequest(
                    "code and clear_code sent together".to_string(),
                ));
            }
            let language = language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string());
            Patch::Set(CodePayload::new(content, language))
        }
        Some(_) => Patch::Clear,
        None if clear_code => Patch::Clear,
        None => Patch::Keep,
    };

    let image = match image {
        Some(_) if clear_image => {
            return Err(AppError::BadRequest(
                "image and clear_image sent together".to_string(),
            ));
        }
        Some(file) => Patch::Set(file),
        None if clear_image => Patch::Clear,
        None => Patch::Keep,
    };

    Ok(ContentUpdate { body, code, image })
}

/// Parse an image replacement form.
async fn read_image_form(mut multipart: Multipart) -> AppResult<ContentUpdate> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("image") {
            let image = read_image_field(field).await?;
            return Ok(ContentUpdate::default().set_image(image));
        }
    }
    Err(AppError::BadRequest("no image provided".to_string()))
}
