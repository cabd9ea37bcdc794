//! HTTP middleware components.

pub mod metrics;

pub use metrics::track_requests;
