//! Comment model for discussions on posts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::{CodePayload, ContentRef, ImageRef};

/// Comment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique identifier (UUIDv7).
    pub id: Uuid,

    /// Parent post ID.
    pub post_id: Uuid,

    /// Project of the parent post.
    pub project_id: Uuid,

    /// Author user ID.
    pub author_id: Uuid,

    /// Comment text.
    pub body: String,

    /// Key into the code snippet repository.
    pub code_ref: Option<String>,

    /// Attached image.
    pub image: Option<ImageRef>,

    /// Unix timestamp when created.
    pub created: i64,

    /// Unix timestamp when last changed.
    pub changed: i64,
}

impl Comment {
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::comment(self.id)
    }
}

/// Input for inserting a comment row.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub code_ref: Option<String>,
    pub image: Option<ImageRef>,
}

/// A comment with its code payload resolved.
///
/// `code` is `None` both when the comment has no snippet and when its
/// snippet could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub code: Option<CodePayload>,
}
