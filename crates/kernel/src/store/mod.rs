//! Relational content store.
//!
//! Typed CRUD over post and comment rows. The coordinator is the only
//! writer; these implementations do no sequencing of their own.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Comment, NewComment, NewPost, Post, Replaced, RowPatch};

pub use memory::MemoryContentStore;
pub use postgres::PgContentStore;

/// Post and comment rows.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_post(&self, input: NewPost) -> Result<Post>;

    async fn insert_comment(&self, input: NewComment) -> Result<Comment>;

    /// Apply a patch. `None` when the row no longer exists.
    async fn update_post(&self, id: Uuid, patch: RowPatch) -> Result<Option<Replaced<Post>>>;

    /// Apply a patch. `None` when the row no longer exists.
    async fn update_comment(&self, id: Uuid, patch: RowPatch)
    -> Result<Option<Replaced<Comment>>>;

    /// Delete a post row and return it. Fails while comments still reference it.
    async fn delete_post(&self, id: Uuid) -> Result<Option<Post>>;

    /// Delete a comment row and return it.
    async fn delete_comment(&self, id: Uuid) -> Result<Option<Comment>>;

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>>;

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>>;

    /// All comments of the given posts in one query, oldest first.
    async fn comments_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Comment>>;

    /// All posts of a project, newest first.
    async fn posts_for_project(&self, project_id: Uuid) -> Result<Vec<Post>>;
}
