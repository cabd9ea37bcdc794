//! Best-effort removal of attachments no row references any more.
//!
//! Every resource in a job is attempted independently. Failures are never
//! returned to the caller of the content operation; they are recorded in
//! the [`CleanupLedger`] for out-of-band remediation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::code::CodeRepository;
use crate::image::ImageRepository;
use crate::metrics::Metrics;
use crate::models::ContentRef;

/// Failures kept in the ledger before the oldest are dropped.
const LEDGER_CAPACITY: usize = 10_000;

/// An attachment that may be left without an owning row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "store", content = "id", rename_all = "snake_case")]
pub enum OrphanResource {
    /// Code snippet key.
    Code(String),
    /// Image public id.
    Image(String),
}

impl OrphanResource {
    pub fn store(&self) -> &'static str {
        match self {
            OrphanResource::Code(_) => "code",
            OrphanResource::Image(_) => "image",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            OrphanResource::Code(id) | OrphanResource::Image(id) => id,
        }
    }
}

impl fmt::Display for OrphanResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.store(), self.id())
    }
}

/// Why an attachment is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    /// Written during an operation that then failed.
    RolledBack,
    /// Replaced or removed by an update.
    Superseded,
    /// Its row was deleted.
    Deleted,
}

impl CleanupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupReason::RolledBack => "rolled_back",
            CleanupReason::Superseded => "superseded",
            CleanupReason::Deleted => "deleted",
        }
    }
}

/// A best-effort delete that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCleanupFailure {
    pub resource: OrphanResource,
    pub reason: CleanupReason,
    /// Row the resource belonged to.
    pub owner: ContentRef,
    pub error: String,
    /// Unix timestamp of the failed attempt.
    pub at: i64,
}

/// Record of cleanup failures, shared between the coordinator and operators.
#[derive(Debug, Clone, Default)]
pub struct CleanupLedger {
    failures: Arc<Mutex<VecDeque<OrphanCleanupFailure>>>,
}

impl CleanupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: OrphanCleanupFailure) {
        let mut failures = self.failures.lock();
        if failures.len() == LEDGER_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(failure);
    }

    /// Copy of the current failures, oldest first.
    pub fn snapshot(&self) -> Vec<OrphanCleanupFailure> {
        self.failures.lock().iter().cloned().collect()
    }

    /// Remove and return all recorded failures.
    pub fn drain(&self) -> Vec<OrphanCleanupFailure> {
        self.failures.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

/// Attachments to remove for one row.
#[derive(Debug, Clone)]
pub(crate) struct CleanupJob {
    pub owner: ContentRef,
    pub reason: CleanupReason,
    pub resources: Vec<OrphanResource>,
}

/// Stores and sinks a cleanup job needs.
#[derive(Clone)]
pub(crate) struct CleanupContext {
    pub code: Arc<dyn CodeRepository>,
    pub images: Arc<dyn ImageRepository>,
    pub ledger: CleanupLedger,
    pub metrics: Arc<Metrics>,
}

/// Delete every resource in the job, continuing past failures.
///
/// Returns the number of resources that could not be deleted.
pub(crate) async fn run(job: CleanupJob, ctx: CleanupContext) -> usize {
    let mut failed = 0;

    for resource in job.resources {
        let result = match &resource {
            OrphanResource::Code(key) => ctx.code.delete(key).await,
            OrphanResource::Image(public_id) => ctx.images.delete(public_id).await,
        };

        match result {
            Ok(()) => {
                debug!(
                    resource = %resource,
                    owner = %job.owner,
                    reason = job.reason.as_str(),
                    "orphan cleaned up"
                );
            }
            Err(e) => {
                failed += 1;
                warn!(
                    error = %e,
                    resource = %resource,
                    owner = %job.owner,
                    reason = job.reason.as_str(),
                    "orphan cleanup failed"
                );
                ctx.metrics
                    .record_cleanup_failure(resource.store(), job.reason.as_str());
                ctx.ledger.record(OrphanCleanupFailure {
                    resource,
                    reason: job.reason,
                    owner: job.owner,
                    error: format!("{e:#}"),
                    at: chrono::Utc::now().timestamp(),
                });
            }
        }
    }

    failed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use anyhow::Result;
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::code::{CodeSnippet, MemoryCodeRepository, NewCodeSnippet};
    use crate::image::{ImageService, MemoryImageStorage};
    use crate::models::CodePayload;

    /// Code repository whose deletes always fail.
    struct BrokenDeletes;

    #[async_trait]
    impl CodeRepository for BrokenDeletes {
        async fn put(&self, _key: Option<&str>, _snippet: NewCodeSnippet) -> Result<String> {
            anyhow::bail!("unused")
        }
        async fn get(&self, _key: &str) -> Result<Option<CodeSnippet>> {
            Ok(None)
        }
        async fn get_many(&self, _keys: &[String]) -> Result<HashMap<String, CodeSnippet>> {
            Ok(HashMap::new())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            anyhow::bail!("document store unavailable")
        }
    }

    fn failure(n: usize) -> OrphanCleanupFailure {
        OrphanCleanupFailure {
            resource: OrphanResource::Code(format!("code_{n}")),
            reason: CleanupReason::Deleted,
            owner: ContentRef::post(Uuid::nil()),
            error: "boom".to_string(),
            at: 0,
        }
    }

    #[test]
    fn ledger_drain_empties() {
        let ledger = CleanupLedger::new();
        ledger.record(failure(1));
        ledger.record(failure(2));
        assert_eq!(ledger.snapshot().len(), 2);
        assert_eq!(ledger.drain().len(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn resource_display() {
        assert_eq!(OrphanResource::Image("f/x.png".into()).to_string(), "image:f/x.png");
        let json = serde_json::to_value(OrphanResource::Code("k".into())).unwrap();
        assert_eq!(json, serde_json::json!({"store": "code", "id": "k"}));
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_the_rest() {
        let images = Arc::new(ImageService::new(Arc::new(MemoryImageStorage::default())));
        let ledger = CleanupLedger::new();
        let ctx = CleanupContext {
            code: Arc::new(BrokenDeletes),
            images: images.clone(),
            ledger: ledger.clone(),
            metrics: Arc::new(Metrics::new()),
        };

        let job = CleanupJob {
            owner: ContentRef::comment(Uuid::now_v7()),
            reason: CleanupReason::Deleted,
            resources: vec![
                OrphanResource::Code("code_1_aaaaaaa".into()),
                OrphanResource::Image("folder/x.png".into()),
            ],
        };

        assert_eq!(run(job, ctx).await, 1);
        let failures = ledger.snapshot();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].resource, OrphanResource::Code("code_1_aaaaaaa".into()));
        assert!(failures[0].error.contains("document store unavailable"));
    }

    #[tokio::test]
    async fn successful_job_records_nothing() {
        let code = Arc::new(MemoryCodeRepository::new());
        let key = code
            .put(
                None,
                NewCodeSnippet {
                    payload: CodePayload::new("x", "text"),
                    owner: ContentRef::post(Uuid::nil()),
                    created_by: Uuid::nil(),
                },
            )
            .await
            .unwrap();

        let ledger = CleanupLedger::new();
        let ctx = CleanupContext {
            code: code.clone(),
            images: Arc::new(ImageService::new(Arc::new(MemoryImageStorage::default()))),
            ledger: ledger.clone(),
            metrics: Arc::new(Metrics::new()),
        };
        let job = CleanupJob {
            owner: ContentRef::post(Uuid::nil()),
            reason: CleanupReason::Superseded,
            resources: vec![OrphanResource::Code(key.clone())],
        };

        assert_eq!(run(job, ctx).await, 0);
        assert!(!code.contains(&key));
        assert!(ledger.is_empty());
    }
}
