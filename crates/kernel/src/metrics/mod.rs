//! Prometheus metrics collection.
//!
//! Provides application metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Coordinator operation labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub kind: String,
    pub operation: String,
    pub outcome: String,
}

/// Orphan cleanup labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CleanupLabels {
    pub resource: String,
    pub reason: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// HTTP request counter by method/path/status.
    pub http_requests: Family<HttpLabels, Counter>,

    /// HTTP request duration histogram.
    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Coordinator operations by content kind, operation, and outcome.
    pub content_operations: Family<OperationLabels, Counter>,

    /// Best-effort deletes that failed and left an orphan behind.
    pub orphan_cleanup_failures: Family<CleanupLabels, Counter>,

    /// Image uploads counter.
    pub image_uploads: Counter,

    /// Image upload bytes counter.
    pub image_upload_bytes: Counter,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let content_operations = Family::<OperationLabels, Counter>::default();
        registry.register(
            "content_operations",
            "Content coordinator operations",
            content_operations.clone(),
        );

        let orphan_cleanup_failures = Family::<CleanupLabels, Counter>::default();
        registry.register(
            "orphan_cleanup_failures",
            "Best-effort deletes that failed",
            orphan_cleanup_failures.clone(),
        );

        let image_uploads = Counter::default();
        registry.register(
            "image_uploads",
            "Total image uploads",
            image_uploads.clone(),
        );

        let image_upload_bytes = Counter::default();
        registry.register(
            "image_upload_bytes",
            "Total image bytes uploaded",
            image_upload_bytes.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            content_operations,
            orphan_cleanup_failures,
            image_uploads,
            image_upload_bytes,
        }
    }

    /// Record an HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a coordinator operation.
    pub fn record_operation(&self, kind: &str, operation: &str, outcome: &str) {
        let labels = OperationLabels {
            kind: kind.to_string(),
            operation: operation.to_string(),
            outcome: outcome.to_string(),
        };
        self.content_operations.get_or_create(&labels).inc();
    }

    /// Record a failed best-effort delete.
    pub fn record_cleanup_failure(&self, resource: &str, reason: &str) {
        let labels = CleanupLabels {
            resource: resource.to_string(),
            reason: reason.to_string(),
        };
        self.orphan_cleanup_failures.get_or_create(&labels).inc();
    }

    /// Record an image upload.
    pub fn record_upload(&self, bytes: u64) {
        self.image_uploads.inc();
        self.image_upload_bytes.inc_by(bytes);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Normalize a path for metrics labels.
///
/// Replaces dynamic segments (UUIDs, IDs) with placeholders to limit cardinality.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|s| {
            if uuid::Uuid::parse_str(s).is_ok()
                || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            {
                "{id}"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/post/123"), "/api/post/{id}");
        assert_eq!(
            normalize_path("/api/post/550e8400-e29b-41d4-a716-446655440000/comments"),
            "/api/post/{id}/comments"
        );
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let output = metrics.encode();
        assert!(output.contains("image_uploads_total"));
    }

    #[test]
    fn test_record_operation_and_cleanup_failure() {
        let metrics = Metrics::new();
        metrics.record_operation("post", "create", "ok");
        metrics.record_cleanup_failure("image", "superseded");

        let output = metrics.encode();
        assert!(output.contains("content_operations_total"));
        assert!(output.contains("outcome=\"ok\""));
        assert!(output.contains("orphan_cleanup_failures_total"));
        assert!(output.contains("reason=\"superseded\""));
    }
}
