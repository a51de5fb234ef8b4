//! Profile counters for the insert path.
//!
//! Counters are lock-free accumulators shared by every writer invocation;
//! snapshots are cheap and safe to take from monitoring threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the writer's profile counters.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct WriterMetricsSnapshot {
    /// Blocks written by the main part path.
    pub blocks: u64,
    /// Blocks that arrived already sorted.
    pub blocks_already_sorted: u64,
    /// Rows written to main parts.
    pub rows: u64,
    /// Uncompressed bytes written to main parts.
    pub uncompressed_bytes: u64,
    /// On-disk bytes of finished main parts.
    pub compressed_bytes: u64,
    /// Blocks written by the projection path.
    pub projection_blocks: u64,
    /// Projection blocks that arrived already sorted.
    pub projection_blocks_already_sorted: u64,
    /// Rows written to projection parts.
    pub projection_rows: u64,
    /// Uncompressed bytes written to projection parts.
    pub projection_uncompressed_bytes: u64,
    /// On-disk bytes of finished projection parts.
    pub projection_compressed_bytes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct WriterMetrics {
    blocks: AtomicU64,
    blocks_already_sorted: AtomicU64,
    rows: AtomicU64,
    uncompressed_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    projection_blocks: AtomicU64,
    projection_blocks_already_sorted: AtomicU64,
    projection_rows: AtomicU64,
    projection_uncompressed_bytes: AtomicU64,
    projection_compressed_bytes: AtomicU64,
}

impl WriterMetrics {
    pub(crate) fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block_already_sorted(&self) {
        self.blocks_already_sorted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, rows: u64, uncompressed: u64, compressed: u64) {
        self.rows.fetch_add(rows, Ordering::Relaxed);
        self.uncompressed_bytes
            .fetch_add(uncompressed, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(compressed, Ordering::Relaxed);
    }

    pub(crate) fn record_projection_block(&self) {
        self.projection_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_projection_block_already_sorted(&self) {
        self.projection_blocks_already_sorted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_projection_written(&self, rows: u64, uncompressed: u64, compressed: u64) {
        self.projection_rows.fetch_add(rows, Ordering::Relaxed);
        self.projection_uncompressed_bytes
            .fetch_add(uncompressed, Ordering::Relaxed);
        self.projection_compressed_bytes
            .fetch_add(compressed, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WriterMetricsSnapshot {
        WriterMetricsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            blocks_already_sorted: self.blocks_already_sorted.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            uncompressed_bytes: self.uncompressed_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            projection_blocks: self.projection_blocks.load(Ordering::Relaxed),
            projection_blocks_already_sorted: self
                .projection_blocks_already_sorted
                .load(Ordering::Relaxed),
            projection_rows: self.projection_rows.load(Ordering::Relaxed),
            projection_uncompressed_bytes: self
                .projection_uncompressed_bytes
                .load(Ordering::Relaxed),
            projection_compressed_bytes: self.projection_compressed_bytes.load(Ordering::Relaxed),
        }
    }
}
