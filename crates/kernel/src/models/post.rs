//! Post model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::{CodePayload, ContentRef, ImageRef};

/// Post record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Unique identifier (UUIDv7).
    pub id: Uuid,

    /// Project the post belongs to.
    pub project_id: Uuid,

    /// Author user ID.
    pub author_id: Uuid,

    /// Post text.
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

impl Post {
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::post(self.id)
    }
}

/// Input for inserting a post row.
///
/// The id is chosen by the caller so attachments can name their owner
/// before the row exists.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub code_ref: Option<String>,
    pub image: Option<ImageRef>,
}

/// A post with its code payload resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPost {
    #[serde(flatten)]
    pub post: Post,
    pub code: Option<CodePayload>,
}
