//! In-process relational store.
//!
//! Mirrors the Postgres constraints the coordinator relies on: a comment
//! needs an existing post, and a post with comments cannot be deleted.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::ContentStore;
use crate::models::{Comment, ImageRef, NewComment, NewPost, Post, Replaced, RowPatch};

#[derive(Debug, Default)]
struct Tables {
    posts: HashMap<Uuid, Post>,
    comments: HashMap<Uuid, Comment>,
}

/// Content rows held in memory.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    tables: RwLock<Tables>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_count(&self) -> usize {
        self.tables.read().posts.len()
    }

    pub fn comment_count(&self) -> usize {
        self.tables.read().comments.len()
    }
}

fn apply_patch(
    patch: RowPatch,
    body: &mut String,
    code_ref: &mut Option<String>,
    image: &mut Option<ImageRef>,
    changed: &mut i64,
) {
    if let Some(new_body) = patch.body {
        *body = new_body;
    }
    if let Some(new_code) = patch.code_ref {
        *code_ref = new_code;
    }
    if let Some(new_image) = patch.image {
        *image = new_image;
    }
    *changed = chrono::Utc::now().timestamp();
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn insert_post(&self, input: NewPost) -> Result<Post> {
        let mut tables = self.tables.write();
        if tables.posts.contains_key(&input.id) {
            bail!("duplicate post id {}", input.id);
        }

        let now = chrono::Utc::now().timestamp();
        let post = Post {
            id: input.id,
            project_id: input.project_id,
            author_id: input.author_id,
            body: input.body,
            code_ref: input.code_ref,
            image: input.image,
            created: now,
            changed: now,
        };
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn insert_comment(&self, input: NewComment) -> Result<Comment> {
        let mut tables = self.tables.write();
        if !tables.posts.contains_key(&input.post_id) {
            bail!("comment references missing post {}", input.post_id);
        }
        if tables.comments.contains_key(&input.id) {
            bail!("duplicate comment id {}", input.id);
        }

        let now = chrono::Utc::now().timestamp();
        let comment = Comment {
            id: input.id,
            post_id: input.post_id,
            project_id: input.project_id,
            author_id: input.author_id,
            body: input.body,
            code_ref: input.code_ref,
            image: input.image,
            created: now,
            changed: now,
        };
        tables.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn update_post(&self, id: Uuid, patch: RowPatch) -> Result<Option<Replaced<Post>>> {
        let mut tables = self.tables.write();
        let Some(post) = tables.posts.get_mut(&id) else {
            return Ok(None);
        };

        let previous = post.clone();
        apply_patch(
            patch,
            &mut post.body,
            &mut post.code_ref,
            &mut post.image,
            &mut post.changed,
        );
        Ok(Some(Replaced {
            previous,
            current: post.clone(),
        }))
    }

    async fn update_comment(
        &self,
        id: Uuid,
        patch: RowPatch,
    ) -> Result<Option<Replaced<Comment>>> {
        let mut tables = self.tables.write();
        let Some(comment) = tables.comments.get_mut(&id) else {
            return Ok(None);
        };

        let previous = comment.clone();
        apply_patch(
            patch,
            &mut comment.body,
            &mut comment.code_ref,
            &mut comment.image,
            &mut comment.changed,
        );
        Ok(Some(Replaced {
            previous,
            current: comment.clone(),
        }))
    }

    async fn delete_post(&self, id: Uuid) -> Result<Option<Post>> {
        let mut tables = self.tables.write();
        if tables.comments.values().any(|c| c.post_id == id) {
            bail!("post {id} still has comments");
        }
        Ok(tables.posts.remove(&id))
    }

    async fn delete_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        Ok(self.tables.write().comments.remove(&id))
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        Ok(self.tables.read().posts.get(&id).cloned())
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        Ok(self.tables.read().comments.get(&id).cloned())
    }

    async fn comments_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Comment>> {
        let tables = self.tables.read();
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|c| post_ids.contains(&c.post_id))
            .cloned()
            .collect();
        comments.sort_by_key(|c| (c.created, c.id));
        Ok(comments)
    }

    async fn posts_for_project(&self, project_id: Uuid) -> Result<Vec<Post>> {
        let tables = self.tables.read();
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        posts.sort_by_key(|p| std::cmp::Reverse((p.created, p.id)));
        Ok(posts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn new_post(project_id: Uuid) -> NewPost {
        NewPost {
            id: Uuid::now_v7(),
            project_id,
            author_id: Uuid::now_v7(),
            body: "hello".to_string(),
            code_ref: Some("code_1_aaaaaaa".to_string()),
            image: None,
        }
    }

    fn new_comment(post: &Post) -> NewComment {
        NewComment {
            id: Uuid::now_v7(),
            post_id: post.id,
            project_id: post.project_id,
            author_id: Uuid::now_v7(),
            body: "reply".to_string(),
            code_ref: None,
            image: None,
        }
    }

    #[tokio::test]
    async fn update_reports_previous_row() {
        let store = MemoryContentStore::new();
        let post = store.insert_post(new_post(Uuid::now_v7())).await.unwrap();

        let replaced = store
            .update_post(
                post.id,
                RowPatch {
                    body: Some("edited".to_string()),
                    code_ref: Some(None),
                    image: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(replaced.previous.code_ref.as_deref(), Some("code_1_aaaaaaa"));
        assert_eq!(replaced.current.code_ref, None);
        assert_eq!(replaced.current.body, "edited");

        assert!(
            store
                .update_post(Uuid::now_v7(), RowPatch::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn comments_restrict_post_deletion() {
        let store = MemoryContentStore::new();
        let post = store.insert_post(new_post(Uuid::now_v7())).await.unwrap();
        let comment = store.insert_comment(new_comment(&post)).await.unwrap();

        assert!(store.delete_post(post.id).await.is_err());

        assert_eq!(
            store.delete_comment(comment.id).await.unwrap().unwrap().id,
            comment.id
        );
        assert!(store.delete_post(post.id).await.unwrap().is_some());
        assert!(store.delete_post(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn comment_needs_parent() {
        let store = MemoryContentStore::new();
        let orphan = NewComment {
            id: Uuid::now_v7(),
            post_id: Uuid::now_v7(),
            project_id: Uuid::now_v7(),
            author_id: Uuid::now_v7(),
            body: "x".to_string(),
            code_ref: None,
            image: None,
        };
        assert!(store.insert_comment(orphan).await.is_err());
    }

    #[tokio::test]
    async fn batch_select_filters_by_post() {
        let store = MemoryContentStore::new();
        let project = Uuid::now_v7();
        let p1 = store.insert_post(new_post(project)).await.unwrap();
        let p2 = store.insert_post(new_post(project)).await.unwrap();
        let p3 = store.insert_post(new_post(project)).await.unwrap();
        for post in [&p1, &p2, &p2, &p3] {
            store.insert_comment(new_comment(post)).await.unwrap();
        }

        let comments = store.comments_for_posts(&[p1.id, p2.id]).await.unwrap();
        assert_eq!(comments.len(), 3);
        assert!(comments.iter().all(|c| c.post_id != p3.id));

        assert_eq!(store.posts_for_project(project).await.unwrap().len(), 3);
        assert!(store.comments_for_posts(&[]).await.unwrap().is_empty());
    }
}
