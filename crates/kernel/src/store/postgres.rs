//! PostgreSQL content store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::ContentStore;
use crate::models::{Comment, ImageRef, NewComment, NewPost, Post, Replaced, RowPatch};

/// Database row for post.
#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    project_id: Uuid,
    author_id: Uuid,
    body: String,
    code_ref: Option<String>,
    image_public_id: Option<String>,
    image_url: Option<String>,
    created: i64,
    changed: i64,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            author_id: row.author_id,
            body: row.body,
            code_ref: row.code_ref,
            image: ImageRef::from_columns(row.image_public_id, row.image_url),
            created: row.created,
            changed: row.changed,
        }
    }
}

/// Database row for comment.
#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    project_id: Uuid,
    author_id: Uuid,
    body: String,
    code_ref: Option<String>,
    image_public_id: Option<String>,
    image_url: Option<String>,
    created: i64,
    changed: i64,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            project_id: row.project_id,
            author_id: row.author_id,
            body: row.body,
            code_ref: row.code_ref,
            image: ImageRef::from_columns(row.image_public_id, row.image_url),
            created: row.created,
            changed: row.changed,
        }
    }
}

/// Bind values for an update: each tri-state column becomes a flag plus value.
struct PatchBinds {
    body: Option<String>,
    set_code: bool,
    code_ref: Option<String>,
    set_image: bool,
    image_public_id: Option<String>,
    image_url: Option<String>,
}

impl From<RowPatch> for PatchBinds {
    fn from(patch: RowPatch) -> Self {
        let set_code = patch.code_ref.is_some();
        let set_image = patch.image.is_some();
        let (image_public_id, image_url) = match patch.image.flatten() {
            Some(image) => (Some(image.public_id), Some(image.url)),
            None => (None, None),
        };

        Self {
            body: patch.body,
            set_code,
            code_ref: patch.code_ref.flatten(),
            set_image,
            image_public_id,
            image_url,
        }
    }
}

fn image_columns(image: Option<ImageRef>) -> (Option<String>, Option<String>) {
    match image {
        Some(image) => (Some(image.public_id), Some(image.url)),
        None => (None, None),
    }
}

/// Content store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn insert_post(&self, input: NewPost) -> Result<Post> {
        let now = chrono::Utc::now().timestamp();
        let (image_public_id, image_url) = image_columns(input.image);

        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(input.id)
        .bind(input.project_id)
        .bind(input.author_id)
        .bind(&input.body)
        .bind(&input.code_ref)
        .bind(image_public_id)
        .bind(image_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to create post")?;

        Ok(row.into())
    }

    async fn insert_comment(&self, input: NewComment) -> Result<Comment> {
        let now = chrono::Utc::now().timestamp();
        let (image_public_id, image_url) = image_columns(input.image);

        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(input.id)
        .bind(input.post_id)
        .bind(input.project_id)
        .bind(input.author_id)
        .bind(&input.body)
        .bind(&input.code_ref)
        .bind(image_public_id)
        .bind(image_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to create comment")?;

        Ok(row.into())
    }

    async fn update_post(&self, id: Uuid, patch: RowPatch) -> Result<Option<Replaced<Post>>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        // Lock the row so `previous` is exactly what this update replaces
        let previous = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            FROM posts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock post for update")?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let binds = PatchBinds::from(patch);
        let current = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET body = COALESCE($2, body),
                code_ref = CASE WHEN $3::BOOLEAN THEN $4 ELSE code_ref END,
                image_public_id = CASE WHEN $5::BOOLEAN THEN $6 ELSE image_public_id END,
                image_url = CASE WHEN $5::BOOLEAN THEN $7 ELSE image_url END,
                changed = $8
            WHERE id = $1
            RETURNING id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(id)
        .bind(binds.body)
        .bind(binds.set_code)
        .bind(binds.code_ref)
        .bind(binds.set_image)
        .bind(binds.image_public_id)
        .bind(binds.image_url)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&mut *tx)
        .await
        .context("failed to update post")?;

        tx.commit().await.context("failed to commit post update")?;

        Ok(Some(Replaced {
            previous: previous.into(),
            current: current.into(),
        }))
    }

    async fn update_comment(
        &self,
        id: Uuid,
        patch: RowPatch,
    ) -> Result<Option<Replaced<Comment>>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let previous = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            FROM comments
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock comment for update")?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let binds = PatchBinds::from(patch);
        let current = sqlx::query_as::<_, CommentRow>(
            r#"
            UPDATE comments
            SET body = COALESCE($2, body),
                code_ref = CASE WHEN $3::BOOLEAN THEN $4 ELSE code_ref END,
                image_public_id = CASE WHEN $5::BOOLEAN THEN $6 ELSE image_public_id END,
                image_url = CASE WHEN $5::BOOLEAN THEN $7 ELSE image_url END,
                changed = $8
            WHERE id = $1
            RETURNING id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(id)
        .bind(binds.body)
        .bind(binds.set_code)
        .bind(binds.code_ref)
        .bind(binds.set_image)
        .bind(binds.image_public_id)
        .bind(binds.image_url)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&mut *tx)
        .await
        .context("failed to update comment")?;

        tx.commit().await.context("failed to commit comment update")?;

        Ok(Some(Replaced {
            previous: previous.into(),
            current: current.into(),
        }))
    }

    async fn delete_post(&self, id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            DELETE FROM posts
            WHERE id = $1
            RETURNING id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to delete post")?;

        Ok(row.map(Post::from))
    }

    async fn delete_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            DELETE FROM comments
            WHERE id = $1
            RETURNING id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to delete comment")?;

        Ok(row.map(Comment::from))
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(
            "SELECT id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch post by id")?;

        Ok(row.map(Post::from))
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(
            "SELECT id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed FROM comments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch comment by id")?;

        Ok(row.map(Comment::from))
    }

    async fn comments_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Comment>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            FROM comments
            WHERE post_id = ANY($1)
            ORDER BY created ASC, id ASC
            "#,
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to list comments for posts")?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn posts_for_project(&self, project_id: Uuid) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, project_id, author_id, body, code_ref, image_public_id, image_url, created, changed
            FROM posts
            WHERE project_id = $1
            ORDER BY created DESC, id DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list posts for project")?;

        Ok(rows.into_iter().map(Post::from).collect())
    }
}

impl std::fmt::Debug for PgContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgContentStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_binds_distinguish_keep_and_clear() {
        let keep = PatchBinds::from(RowPatch::default());
        assert!(!keep.set_code);
        assert!(!keep.set_image);

        let clear = PatchBinds::from(RowPatch {
            body: None,
            code_ref: Some(None),
            image: Some(None),
        });
        assert!(clear.set_code);
        assert!(clear.code_ref.is_none());
        assert!(clear.set_image);
        assert!(clear.image_public_id.is_none());

        let set = PatchBinds::from(RowPatch {
            body: Some("b".to_string()),
            code_ref: Some(Some("k".to_string())),
            image: Some(Some(ImageRef {
                public_id: "p".to_string(),
                url: "u".to_string(),
            })),
        });
        assert_eq!(set.code_ref.as_deref(), Some("k"));
        assert_eq!(set.image_public_id.as_deref(), Some("p"));
        assert_eq!(set.image_url.as_deref(), Some("u"));
    }
}
