//! Read-side aggregation of rows with their code payloads.
//!
//! Rows come from the relational store in one batch query; code payloads
//! are fetched with a single batch lookup. A missing or unreadable snippet
//! yields `code: None` instead of failing the read.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::code::{CodeRepository, CodeSnippet};
use crate::models::{CodePayload, Comment, Post, ResolvedComment, ResolvedPost};
use crate::store::ContentStore;

/// A post with its comments, oldest comment first.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetails {
    pub post: ResolvedPost,
    pub comments: Vec<ResolvedComment>,
}

/// Joins rows with their code payloads.
#[derive(Clone)]
pub struct ReadAggregator {
    store: Arc<dyn ContentStore>,
    code: Arc<dyn CodeRepository>,
}

impl ReadAggregator {
    pub fn new(store: Arc<dyn ContentStore>, code: Arc<dyn CodeRepository>) -> Self {
        Self { store, code }
    }

    /// Comments of the given posts with resolved code, oldest first.
    pub async fn list_comments(&self, post_ids: &[Uuid]) -> Result<Vec<ResolvedComment>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let comments = self.store.comments_for_posts(post_ids).await?;
        Ok(self.resolve_comments(comments).await)
    }

    /// Posts of a project with resolved code, newest first.
    pub async fn list_posts(&self, project_id: Uuid) -> Result<Vec<ResolvedPost>> {
        let posts = self.store.posts_for_project(project_id).await?;
        let keys: Vec<String> = posts.iter().filter_map(|p| p.code_ref.clone()).collect();
        let mut snippets = self.fetch(&keys).await;

        Ok(posts
            .into_iter()
            .map(|post| {
                let code = take_payload(&mut snippets, post.code_ref.as_deref());
                ResolvedPost { post, code }
            })
            .collect())
    }

    /// A post and its comments, or `None` if the post does not exist.
    pub async fn post_details(&self, post_id: Uuid) -> Result<Option<PostDetails>> {
        let Some(post) = self.store.find_post(post_id).await? else {
            return Ok(None);
        };
        let comments = self.store.comments_for_posts(&[post_id]).await?;

        let keys: Vec<String> = post
            .code_ref
            .iter()
            .cloned()
            .chain(comments.iter().filter_map(|c| c.code_ref.clone()))
            .collect();
        let mut snippets = self.fetch(&keys).await;

        let post = resolve_post(&mut snippets, post);
        let comments = comments
            .into_iter()
            .map(|comment| resolve_comment(&mut snippets, comment))
            .collect();

        Ok(Some(PostDetails { post, comments }))
    }

    async fn resolve_comments(&self, comments: Vec<Comment>) -> Vec<ResolvedComment> {
        let keys: Vec<String> = comments.iter().filter_map(|c| c.code_ref.clone()).collect();
        let mut snippets = self.fetch(&keys).await;
        comments
            .into_iter()
            .map(|comment| resolve_comment(&mut snippets, comment))
            .collect()
    }

    /// Batch lookup. An empty key set skips the document store entirely.
    async fn fetch(&self, keys: &[String]) -> HashMap<String, CodeSnippet> {
        if keys.is_empty() {
            return HashMap::new();
        }
        match self.code.get_many(keys).await {
            Ok(found) => {
                if found.len() < keys.len() {
                    warn!(
                        requested = keys.len(),
                        found = found.len(),
                        "some code snippets are missing"
                    );
                }
                found
            }
            Err(e) => {
                warn!(error = %e, keys = keys.len(), "code snippet lookup failed, serving rows without code");
                HashMap::new()
            }
        }
    }
}

impl std::fmt::Debug for ReadAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadAggregator").finish()
    }
}

fn take_payload(
    snippets: &mut HashMap<String, CodeSnippet>,
    key: Option<&str>,
) -> Option<CodePayload> {
    // Keys are unique per row, so each snippet is used at most once
    key.and_then(|k| snippets.remove(k)).map(|s| s.payload())
}

fn resolve_post(snippets: &mut HashMap<String, CodeSnippet>, post: Post) -> ResolvedPost {
    let code = take_payload(snippets, post.code_ref.as_deref());
    ResolvedPost { post, code }
}

fn resolve_comment(snippets: &mut HashMap<String, CodeSnippet>, comment: Comment) -> ResolvedComment {
    let code = take_payload(snippets, comment.code_ref.as_deref());
    ResolvedComment { comment, code }
}
