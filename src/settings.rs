//! Writer settings and per-call context.

/// Tunables consulted by a single writer invocation.
///
/// Defaults mirror a production deployment; tests override freely.
#[derive(Clone, Debug)]
pub struct WriterSettings {
    /// Pre-apply the table's merging mode while inserting.
    pub optimize_on_insert: bool,
    /// Fsync every written file before the part is considered durable.
    pub fsync_after_insert: bool,
    /// Fsync the part directory when the write scope ends.
    pub fsync_part_directory: bool,
    /// Defaults ratio at or above which a column serializes sparsely.
    pub ratio_of_defaults_for_sparse_serialization: f64,
    /// Stamp every produced part with a fresh UUID.
    pub assign_part_uuids: bool,
    /// Upper bound on distinct partitions per insert block; 0 disables.
    pub max_partitions_per_insert_block: usize,
    /// Parts below this byte size become compact.
    pub min_bytes_for_wide_part: u64,
    /// Parts below this row count become compact.
    pub min_rows_for_wide_part: u64,
    /// Parts below this byte size may stay in memory.
    pub min_bytes_for_in_memory_part: u64,
    /// Parts below this row count may stay in memory.
    pub min_rows_for_in_memory_part: u64,
    /// Whether in-memory parts are covered by a write-ahead log.
    pub in_memory_parts_enable_wal: bool,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            optimize_on_insert: true,
            fsync_after_insert: false,
            fsync_part_directory: false,
            ratio_of_defaults_for_sparse_serialization: 0.9375,
            assign_part_uuids: false,
            max_partitions_per_insert_block: 100,
            min_bytes_for_wide_part: 10 * 1024 * 1024,
            min_rows_for_wide_part: 0,
            min_bytes_for_in_memory_part: 0,
            min_rows_for_in_memory_part: 0,
            in_memory_parts_enable_wal: false,
        }
    }
}

/// Per-call context handed to the writer.
#[derive(Clone, Debug, Default)]
pub struct WriterContext {
    /// Effective settings for this insert.
    pub settings: WriterSettings,
    /// Transaction the insert belongs to, if any.
    pub transaction: Option<u64>,
}

impl WriterContext {
    /// Context with the given settings and no transaction.
    pub fn new(settings: WriterSettings) -> Self {
        Self {
            settings,
            transaction: None,
        }
    }
}
