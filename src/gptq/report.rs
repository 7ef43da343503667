//! Compression metrics reporting
//!
//! The session emits one [`CompressionMetrics`] record per compressed layer
//! through an injected reporter. The default reporter discards everything;
//! correctness never depends on a reporting channel being attached.

use serde::Serialize;
use std::time::Duration;

/// Summary of one layer's compression pass
#[derive(Clone, Debug, Serialize)]
pub struct CompressionMetrics {
    /// Layer name
    pub layer: String,
    /// Wall-clock time of the compression pass
    pub elapsed: Duration,
    /// Summed squared-error loss across all rows
    pub total_loss: f32,
    /// Byte size of the compressed representation (packed weight + params)
    pub compressed_bytes: usize,
}

/// Sink for per-layer compression metrics
pub trait CompressionReporter {
    fn report(&self, metrics: &CompressionMetrics);
}

/// Discards all metrics
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl CompressionReporter for NoopReporter {
    fn report(&self, _metrics: &CompressionMetrics) {}
}

/// Emits metrics as `tracing` info events
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl CompressionReporter for TracingReporter {
    fn report(&self, metrics: &CompressionMetrics) {
        tracing::info!(
            layer = %metrics.layer,
            elapsed_ms = metrics.elapsed.as_millis() as u64,
            loss = metrics.total_loss,
            compressed_bytes = metrics.compressed_bytes,
            "layer compressed"
        );
    }
}
