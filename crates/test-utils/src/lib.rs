//! Lectern test utilities.
//!
//! Fixtures, fault-injecting store doubles and a coordinator harness over
//! the in-memory backends. The doubles wrap the real in-memory stores, so
//! anything not explicitly failed behaves exactly like the real thing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use lectern_kernel::aggregator::ReadAggregator;
use lectern_kernel::code::{
    CodeRepository, CodeSnippet, MemoryCodeRepository, NewCodeSnippet, RetryPolicy,
};
use lectern_kernel::coordinator::{Coordinator, CoordinatorConfig, ImageFile, Stores};
use lectern_kernel::image::{
    ImageAsset, ImageRepository, ImageService, ImageUpload, MemoryImageStorage,
};
use lectern_kernel::metrics::Metrics;
use lectern_kernel::models::{
    Actor, CodePayload, Comment, NewComment, NewPost, Post, Replaced, Role, RowPatch,
};
use lectern_kernel::notify::{ContentEvent, NotificationEmitter};
use lectern_kernel::store::{ContentStore, MemoryContentStore};

// ============================================================================
// Fixtures
// ============================================================================

/// A member with a fresh id.
pub fn member() -> Actor {
    Actor::member(Uuid::now_v7())
}

/// A supervisor with a fresh id.
pub fn supervisor() -> Actor {
    Actor::with_role(Uuid::now_v7(), Role::Supervisor)
}

/// An admin with a fresh id.
pub fn admin() -> Actor {
    Actor::with_role(Uuid::now_v7(), Role::Admin)
}

/// Smallest byte sequence sniffed as PNG.
pub fn png_bytes() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R', 0x00, 0x00, 0x00, 0x01,
    ]
}

/// Smallest byte sequence sniffed as GIF.
pub fn gif_bytes() -> Vec<u8> {
    b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()
}

/// A valid PNG attachment.
pub fn png_file(name: &str) -> ImageFile {
    ImageFile::new(png_bytes(), "image/png", name)
}

/// A valid GIF attachment.
pub fn gif_file(name: &str) -> ImageFile {
    ImageFile::new(gif_bytes(), "image/gif", name)
}

/// A code payload.
pub fn code(content: &str) -> CodePayload {
    CodePayload::new(content, "rust")
}

// ============================================================================
// Code repository double
// ============================================================================

/// Code repository that can be told to fail.
#[derive(Debug, Default)]
pub struct FaultyCodeRepository {
    inner: MemoryCodeRepository,
    failing_puts: AtomicU32,
    fail_get_many: AtomicBool,
    fail_all_deletes: AtomicBool,
    failing_delete_keys: Mutex<HashSet<String>>,
    pub put_calls: AtomicUsize,
    pub get_many_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FaultyCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` puts.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn fail_get_many(&self, fail: bool) {
        self.fail_get_many.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all_deletes(&self, fail: bool) {
        self.fail_all_deletes.store(fail, Ordering::SeqCst);
    }

    /// Fail deletes of one key only.
    pub fn fail_delete_of(&self, key: &str) {
        self.failing_delete_keys.lock().insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn puts(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_many_count(&self) -> usize {
        self.get_many_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeRepository for FaultyCodeRepository {
    async fn put(&self, key: Option<&str>, snippet: NewCodeSnippet) -> Result<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            bail!("document store write timed out");
        }
        self.inner.put(key, snippet).await
    }

    async fn get(&self, key: &str) -> Result<Option<CodeSnippet>> {
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CodeSnippet>> {
        self.get_many_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_many.load(Ordering::SeqCst) {
            bail!("document store unavailable");
        }
        self.inner.get_many(keys).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_deletes.load(Ordering::SeqCst)
            || self.failing_delete_keys.lock().contains(key)
        {
            bail!("document store delete failed for {key}");
        }
        self.inner.delete(key).await
    }
}

// ============================================================================
// Image repository double
// ============================================================================

/// Image repository over in-memory storage that can be told to fail.
#[derive(Debug)]
pub struct FaultyImageRepository {
    storage: Arc<MemoryImageStorage>,
    inner: ImageService,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    pub upload_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl Default for FaultyImageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultyImageRepository {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryImageStorage::default());
        Self {
            inner: ImageService::new(storage.clone()),
            storage,
            fail_uploads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            upload_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of images currently stored.
    pub fn stored(&self) -> usize {
        self.storage.len()
    }

    pub fn uploads(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRepository for FaultyImageRepository {
    async fn upload(&self, upload: ImageUpload) -> Result<ImageAsset> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            bail!("object store rejected the upload");
        }
        self.inner.upload(upload).await
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("object store delete failed for {public_id}");
        }
        self.inner.delete(public_id).await
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        self.inner.exists(public_id).await
    }
}

// ============================================================================
// Relational store double
// ============================================================================

/// Relational store that can be told to fail or to lose rows mid-operation.
#[derive(Debug, Default)]
pub struct FaultyContentStore {
    inner: MemoryContentStore,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
    fail_post_deletes: AtomicBool,
    fail_comment_deletes: AtomicBool,
    vanish_before_update: AtomicBool,
    pub comments_query_calls: AtomicUsize,
}

impl FaultyContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_post_deletes(&self, fail: bool) {
        self.fail_post_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_comment_deletes(&self, fail: bool) {
        self.fail_comment_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delete the target row just before the next update, as a concurrent
    /// delete would.
    pub fn vanish_before_update(&self, vanish: bool) {
        self.vanish_before_update.store(vanish, Ordering::SeqCst);
    }

    pub fn post_count(&self) -> usize {
        self.inner.post_count()
    }

    pub fn comment_count(&self) -> usize {
        self.inner.comment_count()
    }

    pub fn comments_queries(&self) -> usize {
        self.comments_query_calls.load(Ordering::SeqCst)
    }

    fn take_vanish(&self) -> bool {
        self.vanish_before_update.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FaultyContentStore {
    async fn insert_post(&self, input: NewPost) -> Result<Post> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("relational store insert failed");
        }
        self.inner.insert_post(input).await
    }

    async fn insert_comment(&self, input: NewComment) -> Result<Comment> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("relational store insert failed");
        }
        self.inner.insert_comment(input).await
    }

    async fn update_post(&self, id: Uuid, patch: RowPatch) -> Result<Option<Replaced<Post>>> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("relational store update failed");
        }
        if self.take_vanish() {
            self.inner.delete_post(id).await?;
        }
        self.inner.update_post(id, patch).await
    }

    async fn update_comment(
        &self,
        id: Uuid,
        patch: RowPatch,
    ) -> Result<Option<Replaced<Comment>>> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("relational store update failed");
        }
        if self.take_vanish() {
            self.inner.delete_comment(id).await?;
        }
        self.inner.update_comment(id, patch).await
    }

    async fn delete_post(&self, id: Uuid) -> Result<Option<Post>> {
        if self.fail_post_deletes.load(Ordering::SeqCst) {
            bail!("relational store delete failed");
        }
        self.inner.delete_post(id).await
    }

    async fn delete_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        if self.fail_comment_deletes.load(Ordering::SeqCst) {
            bail!("relational store delete failed");
        }
        self.inner.delete_comment(id).await
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.inner.find_post(id).await
    }

    async fn find_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.inner.find_comment(id).await
    }

    async fn comments_for_posts(&self, post_ids: &[Uuid]) -> Result<Vec<Comment>> {
        self.comments_query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.comments_for_posts(post_ids).await
    }

    async fn posts_for_project(&self, project_id: Uuid) -> Result<Vec<Post>> {
        self.inner.posts_for_project(project_id).await
    }
}

// ============================================================================
// Emitter doubles
// ============================================================================

/// Emitter that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<ContentEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ContentEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(&self, event: ContentEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Emitter that always fails.
#[derive(Debug, Default)]
pub struct FailingEmitter {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl NotificationEmitter for FailingEmitter {
    async fn emit(&self, _event: ContentEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("notification delivery failed")
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A coordinator and aggregator wired to fault-injecting in-memory stores.
///
/// Code writes retry without delay.
pub struct Harness {
    pub coordinator: Coordinator,
    pub aggregator: ReadAggregator,
    pub store: Arc<FaultyContentStore>,
    pub code: Arc<FaultyCodeRepository>,
    pub images: Arc<FaultyImageRepository>,
    pub events: Arc<RecordingEmitter>,
    pub metrics: Arc<Metrics>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let events = Arc::new(RecordingEmitter::new());
        Self::build(events.clone(), events)
    }

    /// Harness whose coordinator emits through `emitter`.
    pub fn with_emitter(emitter: Arc<dyn NotificationEmitter>) -> Self {
        Self::build(emitter, Arc::new(RecordingEmitter::new()))
    }

    fn build(emitter: Arc<dyn NotificationEmitter>, events: Arc<RecordingEmitter>) -> Self {
        let store = Arc::new(FaultyContentStore::new());
        let code = Arc::new(FaultyCodeRepository::new());
        let images = Arc::new(FaultyImageRepository::new());
        let metrics = Arc::new(Metrics::new());

        let coordinator = Coordinator::new(
            Stores {
                content: store.clone(),
                code: code.clone(),
                images: images.clone(),
            },
            emitter,
            metrics.clone(),
            CoordinatorConfig {
                code_retry: RetryPolicy {
                    attempts: 3,
                    delay: Duration::ZERO,
                },
                ..CoordinatorConfig::default()
            },
        );
        let aggregator = ReadAggregator::new(store.clone(), code.clone());

        Self {
            coordinator,
            aggregator,
            store,
            code,
            images,
            events,
            metrics,
        }
    }

    /// Wait for background cleanup and event emission.
    pub async fn settle(&self) {
        self.coordinator.settle().await;
    }
}
