//! Metrics and observability module
//!
//! Provides Prometheus-compatible metrics for the upload pipeline.
//!
//! Key metrics exposed:
//! - Sessions initialized, cancelled and expired
//! - Chunks and bytes received
//! - Finalizations by provider and outcome (cloud or local fallback)
//! - Cloud upload retries and failures

pub mod exporter;
pub mod recorder;

pub use exporter::{
    install_recorder, metrics_route, render_metrics, serve_metrics, MetricsConfig, MetricsError,
};
pub use recorder::{
    init_metrics, record_chunk_received, record_cloud_failure, record_cloud_retry,
    record_session_cancelled, record_session_initialized, record_sessions_expired,
    FinalizeMetrics,
};
