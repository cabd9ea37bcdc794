//! Content lifecycle coordinator.
//!
//! Sequences writes across the relational store, the code document store
//! and the image object store so that no row ever references an attachment
//! that does not exist:
//!
//! - create writes attachments first, then the row
//! - update writes new attachments, swaps the row's references, then
//!   deletes the superseded attachments
//! - delete removes comment rows before their post, then deletes the
//!   attachments the removed rows referenced
//!
//! Attachment deletes and event emission run in the background on a task
//! tracker. Their failures are logged and recorded in the
//! [`CleanupLedger`]; they never fail the operation.

pub mod cleanup;
pub mod input;

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::code::{CodeRepository, NewCodeSnippet, RetryPolicy, put_with_retry};
use crate::error::ContentError;
use crate::image::{DEFAULT_FOLDER, ImageRepository, ImageUpload};
use crate::metrics::Metrics;
use crate::models::{
    Actor, CodePayload, Comment, ContentKind, ContentRef, ImageRef, NewComment, NewPost, Post,
    ResolvedComment, ResolvedPost, RowPatch,
};
use crate::notify::{ContentEvent, EventKind, NotificationEmitter};
use crate::store::ContentStore;

use cleanup::{CleanupContext, CleanupJob};

pub use cleanup::{CleanupLedger, CleanupReason, OrphanCleanupFailure, OrphanResource};
pub use input::{ContentInput, ContentUpdate, ImageFile};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Object store folder for uploaded images.
    pub image_folder: String,
    /// Retry policy for code snippet writes.
    pub code_retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            image_folder: DEFAULT_FOLDER.to_string(),
            code_retry: RetryPolicy::default(),
        }
    }
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Rows removed, including cascaded comments.
    pub rows_deleted: usize,
    /// Attachment deletes handed to the background.
    pub cleanup_scheduled: usize,
}

/// The stores a coordinator writes to.
#[derive(Clone)]
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub code: Arc<dyn CodeRepository>,
    pub images: Arc<dyn ImageRepository>,
}

/// Sequences content operations across the three stores.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    stores: Stores,
    emitter: Arc<dyn NotificationEmitter>,
    metrics: Arc<Metrics>,
    config: CoordinatorConfig,
    tracker: TaskTracker,
    ledger: CleanupLedger,
}

/// Attachments written ahead of a row write.
#[derive(Debug, Default)]
struct Staged {
    code: Option<(String, CodePayload)>,
    image: Option<ImageRef>,
}

impl Staged {
    fn code_key(&self) -> Option<String> {
        self.code.as_ref().map(|(key, _)| key.clone())
    }

    fn resources(&self) -> Vec<OrphanResource> {
        let mut resources = Vec::new();
        if let Some((key, _)) = &self.code {
            resources.push(OrphanResource::Code(key.clone()));
        }
        if let Some(image) = &self.image {
            resources.push(OrphanResource::Image(image.public_id.clone()));
        }
        resources
    }
}

impl Coordinator {
    pub fn new(
        stores: Stores,
        emitter: Arc<dyn NotificationEmitter>,
        metrics: Arc<Metrics>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                stores,
                emitter,
                metrics,
                config,
                tracker: TaskTracker::new(),
                ledger: CleanupLedger::new(),
            }),
        }
    }

    /// Failed attachment deletes awaiting remediation.
    pub fn cleanup_ledger(&self) -> &CleanupLedger {
        &self.inner.ledger
    }

    /// Background cleanup and emission tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait for all background work spawned so far to finish.
    pub async fn settle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Create a post in a project.
    pub async fn create_post(
        &self,
        actor: &Actor,
        project_id: Uuid,
        input: ContentInput,
    ) -> Result<ResolvedPost, ContentError> {
        let result = self.try_create_post(actor, project_id, input).await;
        self.observe(ContentKind::Post, "create", &result);
        result
    }

    /// Add a comment to an existing post.
    ///
    /// The post author is notified unless they wrote the comment.
    pub async fn create_comment(
        &self,
        actor: &Actor,
        post_id: Uuid,
        input: ContentInput,
    ) -> Result<ResolvedComment, ContentError> {
        let result = self.try_create_comment(actor, post_id, input).await;
        self.observe(ContentKind::Comment, "create", &result);
        result
    }

    /// Edit a post's text or attachments.
    pub async fn update_post(
        &self,
        actor: &Actor,
        id: Uuid,
        update: ContentUpdate,
    ) -> Result<ResolvedPost, ContentError> {
        let result = self.try_update_post(actor, id, update).await;
        self.observe(ContentKind::Post, "update", &result);
        result
    }

    /// Edit a comment's text or attachments.
    pub async fn update_comment(
        &self,
        actor: &Actor,
        id: Uuid,
        update: ContentUpdate,
    ) -> Result<ResolvedComment, ContentError> {
        let result = self.try_update_comment(actor, id, update).await;
        self.observe(ContentKind::Comment, "update", &result);
        result
    }

    /// Delete a post (with all its comments) or a single comment.
    pub async fn delete(
        &self,
        actor: &Actor,
        target: ContentRef,
    ) -> Result<DeleteOutcome, ContentError> {
        let result = match target.kind {
            ContentKind::Post => self.try_delete_post(actor, target.id).await,
            ContentKind::Comment => self.try_delete_comment(actor, target.id).await,
        };
        self.observe(target.kind, "delete", &result);
        result
    }

    async fn try_create_post(
        &self,
        actor: &Actor,
        project_id: Uuid,
        input: ContentInput,
    ) -> Result<ResolvedPost, ContentError> {
        input.validate()?;

        let id = Uuid::now_v7();
        let owner = ContentRef::post(id);
        let staged = self.stage(actor, owner, input.code, input.image).await?;

        let new = NewPost {
            id,
            project_id,
            author_id: actor.id,
            body: input.body,
            code_ref: staged.code_key(),
            image: staged.image.clone(),
        };
        let post = match self.inner.stores.content.insert_post(new).await {
            Ok(post) => post,
            Err(e) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                return Err(ContentError::Persistence(e));
            }
        };

        info!(
            post_id = %post.id,
            project_id = %project_id,
            author = %actor.id,
            has_code = post.code_ref.is_some(),
            has_image = post.image.is_some(),
            "post created"
        );
        self.emit(ContentEvent {
            kind: EventKind::PostCreated,
            content: owner,
            post_id: post.id,
            project_id,
            actor_id: actor.id,
            recipient: None,
        });

        Ok(ResolvedPost {
            post,
            code: staged.code.map(|(_, payload)| payload),
        })
    }

    async fn try_create_comment(
        &self,
        actor: &Actor,
        post_id: Uuid,
        input: ContentInput,
    ) -> Result<ResolvedComment, ContentError> {
        input.validate()?;

        let post = self.load_post(post_id).await?;

        let id = Uuid::now_v7();
        let owner = ContentRef::comment(id);
        let staged = self.stage(actor, owner, input.code, input.image).await?;

        let new = NewComment {
            id,
            post_id,
            project_id: post.project_id,
            author_id: actor.id,
            body: input.body,
            code_ref: staged.code_key(),
            image: staged.image.clone(),
        };
        let comment = match self.inner.stores.content.insert_comment(new).await {
            Ok(comment) => comment,
            Err(e) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                // The parent may have been deleted since it was loaded
                if let Ok(None) = self.inner.stores.content.find_post(post_id).await {
                    return Err(ContentError::NotFound {
                        kind: ContentKind::Post,
                        id: post_id,
                    });
                }
                return Err(ContentError::Persistence(e));
            }
        };

        info!(
            comment_id = %comment.id,
            post_id = %post_id,
            author = %actor.id,
            "comment added"
        );
        self.emit(ContentEvent {
            kind: EventKind::CommentAdded,
            content: owner,
            post_id,
            project_id: post.project_id,
            actor_id: actor.id,
            recipient: (post.author_id != actor.id).then_some(post.author_id),
        });

        Ok(ResolvedComment {
            comment,
            code: staged.code.map(|(_, payload)| payload),
        })
    }

    async fn try_update_post(
        &self,
        actor: &Actor,
        id: Uuid,
        update: ContentUpdate,
    ) -> Result<ResolvedPost, ContentError> {
        let owner = ContentRef::post(id);
        let existing = self.load_post(id).await?;
        authorize(actor, owner, existing.author_id)?;
        update.validate(
            &existing.body,
            existing.code_ref.is_some(),
            existing.image.is_some(),
        )?;

        let (staged, patch) = self.stage_update(actor, owner, update).await?;

        let replaced = match self.inner.stores.content.update_post(id, patch).await {
            Ok(Some(replaced)) => replaced,
            Ok(None) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                return Err(not_found(owner));
            }
            Err(e) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                return Err(ContentError::Persistence(e));
            }
        };

        let previous = replaced.previous;
        let post = replaced.current;
        self.release_superseded(
            owner,
            previous.code_ref,
            previous.image,
            post.code_ref.as_deref(),
            post.image.as_ref(),
        );

        info!(post_id = %id, editor = %actor.id, "post updated");
        let code = self.resolve_code(staged, post.code_ref.as_deref()).await;
        Ok(ResolvedPost { post, code })
    }

    async fn try_update_comment(
        &self,
        actor: &Actor,
        id: Uuid,
        update: ContentUpdate,
    ) -> Result<ResolvedComment, ContentError> {
        let owner = ContentRef::comment(id);
        let existing = self.load_comment(id).await?;
        authorize(actor, owner, existing.author_id)?;
        update.validate(
            &existing.body,
            existing.code_ref.is_some(),
            existing.image.is_some(),
        )?;

        let (staged, patch) = self.stage_update(actor, owner, update).await?;

        let replaced = match self.inner.stores.content.update_comment(id, patch).await {
            Ok(Some(replaced)) => replaced,
            Ok(None) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                return Err(not_found(owner));
            }
            Err(e) => {
                self.schedule_cleanup(owner, CleanupReason::RolledBack, staged.resources());
                return Err(ContentError::Persistence(e));
            }
        };

        let previous = replaced.previous;
        let comment = replaced.current;
        self.release_superseded(
            owner,
            previous.code_ref,
            previous.image,
            comment.code_ref.as_deref(),
            comment.image.as_ref(),
        );

        info!(comment_id = %id, editor = %actor.id, "comment updated");
        let code = self.resolve_code(staged, comment.code_ref.as_deref()).await;
        Ok(ResolvedComment { comment, code })
    }

    async fn try_delete_post(&self, actor: &Actor, id: Uuid) -> Result<DeleteOutcome, ContentError> {
        let owner = ContentRef::post(id);
        let existing = self.load_post(id).await?;
        authorize(actor, owner, existing.author_id)?;

        let store = &self.inner.stores.content;
        let comments = store
            .comments_for_posts(&[id])
            .await
            .map_err(ContentError::Persistence)?;

        let mut outcome = DeleteOutcome::default();
        for comment in comments {
            let child = comment.content_ref();
            match store.delete_comment(comment.id).await {
                Ok(Some(deleted)) => {
                    outcome.rows_deleted += 1;
                    outcome.cleanup_scheduled += self.release_attachments(child, &deleted);
                }
                Ok(None) => debug!(comment_id = %comment.id, "comment already gone"),
                Err(e) => {
                    warn!(error = %e, comment_id = %comment.id, post_id = %id, "cascade delete stopped");
                    return Err(ContentError::Persistence(e.context(format!(
                        "failed to delete comment {} of post {id}",
                        comment.id
                    ))));
                }
            }
        }

        let post = store
            .delete_post(id)
            .await
            .map_err(ContentError::Persistence)?
            .ok_or_else(|| not_found(owner))?;
        outcome.rows_deleted += 1;
        outcome.cleanup_scheduled += self.schedule_cleanup(
            owner,
            CleanupReason::Deleted,
            attachments(post.code_ref.clone(), post.image.clone()),
        );

        info!(
            post_id = %id,
            actor = %actor.id,
            rows = outcome.rows_deleted,
            cleanup = outcome.cleanup_scheduled,
            "post deleted"
        );
        self.emit(ContentEvent {
            kind: EventKind::PostDeleted,
            content: owner,
            post_id: id,
            project_id: post.project_id,
            actor_id: actor.id,
            recipient: None,
        });

        Ok(outcome)
    }

    async fn try_delete_comment(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<DeleteOutcome, ContentError> {
        let owner = ContentRef::comment(id);
        let existing = self.load_comment(id).await?;
        authorize(actor, owner, existing.author_id)?;

        let comment = self
            .inner
            .stores
            .content
            .delete_comment(id)
            .await
            .map_err(ContentError::Persistence)?
            .ok_or_else(|| not_found(owner))?;

        let outcome = DeleteOutcome {
            rows_deleted: 1,
            cleanup_scheduled: self.release_attachments(owner, &comment),
        };

        info!(comment_id = %id, post_id = %comment.post_id, actor = %actor.id, "comment deleted");
        self.emit(ContentEvent {
            kind: EventKind::CommentDeleted,
            content: owner,
            post_id: comment.post_id,
            project_id: comment.project_id,
            actor_id: actor.id,
            recipient: None,
        });

        Ok(outcome)
    }

    async fn load_post(&self, id: Uuid) -> Result<Post, ContentError> {
        self.inner
            .stores
            .content
            .find_post(id)
            .await
            .map_err(ContentError::Persistence)?
            .ok_or_else(|| not_found(ContentRef::post(id)))
    }

    async fn load_comment(&self, id: Uuid) -> Result<Comment, ContentError> {
        self.inner
            .stores
            .content
            .find_comment(id)
            .await
            .map_err(ContentError::Persistence)?
            .ok_or_else(|| not_found(ContentRef::comment(id)))
    }

    /// Write new attachments. If the code write fails after the image
    /// landed, the image is rolled back.
    async fn stage(
        &self,
        actor: &Actor,
        owner: ContentRef,
        code: Option<CodePayload>,
        image: Option<ImageFile>,
    ) -> Result<Staged, ContentError> {
        let image = match image {
            Some(file) => Some(self.upload_image(owner.kind, file).await?),
            None => None,
        };

        let code = match code {
            Some(payload) => {
                let snippet = NewCodeSnippet {
                    payload: payload.clone(),
                    owner,
                    created_by: actor.id,
                };
                let repo = self.inner.stores.code.as_ref();
                match put_with_retry(repo, snippet, self.inner.config.code_retry).await {
                    Ok(key) => Some((key, payload)),
                    Err(e) => {
                        if let Some(image) = image {
                            self.schedule_cleanup(
                                owner,
                                CleanupReason::RolledBack,
                                vec![OrphanResource::Image(image.public_id)],
                            );
                        }
                        return Err(ContentError::code_upload(e));
                    }
                }
            }
            None => None,
        };

        Ok(Staged { code, image })
    }

    /// Write replacement attachments and build the row patch that swaps to them.
    async fn stage_update(
        &self,
        actor: &Actor,
        owner: ContentRef,
        update: ContentUpdate,
    ) -> Result<(Staged, RowPatch), ContentError> {
        let ContentUpdate { body, code, image } = update;
        let keep_code = code.is_keep();
        let keep_image = image.is_keep();

        let staged = self
            .stage(actor, owner, code.into_set(), image.into_set())
            .await?;

        let patch = RowPatch {
            body,
            code_ref: (!keep_code).then(|| staged.code_key()),
            image: (!keep_image).then(|| staged.image.clone()),
        };
        Ok((staged, patch))
    }

    /// Upload into `<image_folder>/posts` or `<image_folder>/comments`.
    async fn upload_image(
        &self,
        kind: ContentKind,
        file: ImageFile,
    ) -> Result<ImageRef, ContentError> {
        let size = file.bytes.len() as u64;
        let subfolder = match kind {
            ContentKind::Post => "posts",
            ContentKind::Comment => "comments",
        };
        let upload = ImageUpload {
            bytes: file.bytes,
            mime_type: file.mime_type,
            filename: file.filename,
            folder: format!("{}/{subfolder}", self.inner.config.image_folder),
        };
        let asset = self
            .inner
            .stores
            .images
            .upload(upload)
            .await
            .map_err(ContentError::image_upload)?;
        self.inner.metrics.record_upload(size);
        Ok(asset.into())
    }

    /// Code payload for an updated row: the new payload if one was written,
    /// otherwise whatever the row still references.
    async fn resolve_code(&self, staged: Staged, code_ref: Option<&str>) -> Option<CodePayload> {
        if let Some((_, payload)) = staged.code {
            return Some(payload);
        }
        let key = code_ref?;
        match self.inner.stores.code.get(key).await {
            Ok(snippet) => snippet.map(|s| s.payload()),
            Err(e) => {
                warn!(error = %e, key = %key, "code snippet unavailable");
                None
            }
        }
    }

    /// Schedule deletion of attachments an update replaced or cleared.
    fn release_superseded(
        &self,
        owner: ContentRef,
        previous_code: Option<String>,
        previous_image: Option<ImageRef>,
        current_code: Option<&str>,
        current_image: Option<&ImageRef>,
    ) -> usize {
        let code = previous_code.filter(|key| current_code != Some(key.as_str()));
        let image = previous_image.filter(|old| {
            current_image.map(|i| i.public_id.as_str()) != Some(old.public_id.as_str())
        });
        self.schedule_cleanup(owner, CleanupReason::Superseded, attachments(code, image))
    }

    fn release_attachments(&self, owner: ContentRef, comment: &Comment) -> usize {
        self.schedule_cleanup(
            owner,
            CleanupReason::Deleted,
            attachments(comment.code_ref.clone(), comment.image.clone()),
        )
    }

    /// Hand attachment deletes to the background. Returns how many were scheduled.
    fn schedule_cleanup(
        &self,
        owner: ContentRef,
        reason: CleanupReason,
        resources: Vec<OrphanResource>,
    ) -> usize {
        if resources.is_empty() {
            return 0;
        }
        let count = resources.len();
        let ctx = CleanupContext {
            code: Arc::clone(&self.inner.stores.code),
            images: Arc::clone(&self.inner.stores.images),
            ledger: self.inner.ledger.clone(),
            metrics: Arc::clone(&self.inner.metrics),
        };
        let job = CleanupJob {
            owner,
            reason,
            resources,
        };
        self.inner.tracker.spawn(cleanup::run(job, ctx));
        count
    }

    fn emit(&self, event: ContentEvent) {
        let emitter = Arc::clone(&self.inner.emitter);
        self.inner.tracker.spawn(async move {
            let kind = event.kind;
            let content = event.content;
            if let Err(e) = emitter.emit(event).await {
                warn!(error = %e, event = %kind, content = %content, "event emission failed");
            }
        });
    }

    fn observe<T>(&self, kind: ContentKind, operation: &str, result: &Result<T, ContentError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        self.inner
            .metrics
            .record_operation(kind.as_str(), operation, outcome);

        match result {
            Err(
                e @ (ContentError::Upload { .. } | ContentError::Persistence(_)),
            ) => warn!(error = ?e, kind = %kind, operation, "content operation failed"),
            Err(e) => debug!(error = %e, kind = %kind, operation, "content operation rejected"),
            Ok(_) => {}
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.inner.config)
            .field("pending_tasks", &self.inner.tracker.len())
            .finish()
    }
}

fn authorize(actor: &Actor, target: ContentRef, author_id: Uuid) -> Result<(), ContentError> {
    if actor.can_modify(author_id) {
        Ok(())
    } else {
        Err(ContentError::PermissionDenied {
            actor: actor.id,
            kind: target.kind,
            id: target.id,
        })
    }
}

fn not_found(target: ContentRef) -> ContentError {
    ContentError::NotFound {
        kind: target.kind,
        id: target.id,
    }
}

fn attachments(code: Option<String>, image: Option<ImageRef>) -> Vec<OrphanResource> {
    code.map(OrphanResource::Code)
        .into_iter()
        .chain(image.map(|i| OrphanResource::Image(i.public_id)))
        .collect()
}
