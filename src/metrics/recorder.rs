//! Metrics recorder for upload operations

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::{Duration, Instant};

/// Register every metric description with the installed recorder.
///
/// Descriptions sent before a recorder is installed are dropped, so this runs
/// after installation. Repeated calls are harmless.
pub fn init_metrics() {
    describe_counter!(
        "coursestream_sessions_initialized_total",
        "Total number of chunked upload sessions started"
    );
    describe_counter!(
        "coursestream_sessions_cancelled_total",
        "Total number of upload sessions cancelled by their owner"
    );
    describe_counter!(
        "coursestream_sessions_expired_total",
        "Total number of abandoned sessions removed by the sweeper"
    );
    describe_counter!("coursestream_chunks_received_total", "Total chunks received");
    describe_counter!("coursestream_chunk_bytes_received_total", "Total chunk bytes received");
    describe_counter!(
        "coursestream_uploads_finalized_total",
        "Uploads finalized, labelled by provider and outcome"
    );
    describe_counter!(
        "coursestream_cloud_retries_total",
        "Cloud upload attempts that were retried"
    );
    describe_counter!(
        "coursestream_cloud_failures_total",
        "Cloud uploads that failed after all retries"
    );

    describe_gauge!(
        "coursestream_finalizations_in_progress",
        "Finalizations currently merging or uploading"
    );

    describe_histogram!(
        "coursestream_finalize_duration_seconds",
        "Time from claim to recorded content"
    );
    describe_histogram!("coursestream_upload_size_bytes", "Size of merged uploads");
    describe_histogram!(
        "coursestream_session_declared_chunks",
        "Chunk count declared when a session is initialized"
    );
}

// ============== Session Operations ==============

pub fn record_session_initialized(total_chunks: u32) {
    counter!("coursestream_sessions_initialized_total").increment(1);
    histogram!("coursestream_session_declared_chunks").record(total_chunks as f64);
}

pub fn record_session_cancelled() {
    counter!("coursestream_sessions_cancelled_total").increment(1);
}

pub fn record_sessions_expired(count: usize) {
    counter!("coursestream_sessions_expired_total").increment(count as u64);
}

// ============== Chunk Operations ==============

pub fn record_chunk_received(chunk_size: u64) {
    counter!("coursestream_chunks_received_total").increment(1);
    counter!("coursestream_chunk_bytes_received_total").increment(chunk_size);
}

// ============== Cloud Operations ==============

pub fn record_cloud_retry(provider: &str) {
    counter!("coursestream_cloud_retries_total", "provider" => provider.to_string()).increment(1);
}

pub fn record_cloud_failure(provider: &str) {
    counter!("coursestream_cloud_failures_total", "provider" => provider.to_string()).increment(1);
}

/// Times one finalization from claim to content record
pub struct FinalizeMetrics {
    start_time: Instant,
    provider: String,
}

impl FinalizeMetrics {
    pub fn start(provider: impl Into<String>) -> Self {
        gauge!("coursestream_finalizations_in_progress").increment(1.0);
        Self {
            start_time: Instant::now(),
            provider: provider.into(),
        }
    }

    /// `outcome` is `cloud`, `local` or `processing`
    pub fn finish(self, outcome: &str, bytes: u64) {
        counter!(
            "coursestream_uploads_finalized_total",
            "provider" => self.provider.clone(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("coursestream_finalize_duration_seconds").record(self.elapsed().as_secs_f64());
        histogram!("coursestream_upload_size_bytes").record(bytes as f64);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for FinalizeMetrics {
    fn drop(&mut self) {
        gauge!("coursestream_finalizations_in_progress").decrement(1.0);
    }
}
