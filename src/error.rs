use arrow_schema::ArrowError;
use parquet::errors::ParquetError;

/// Error surfaced by the insert-path writer.
///
/// No variant is recovered internally; every failure propagates to the caller,
/// who may retry the whole insert (a retry allocates a fresh temp index, so
/// the storage layer rejects accidental duplicates by name).
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Partition cardinality of a single insert block exceeded the limit.
    #[error(
        "too many partitions for a single insert block (more than {limit}). \
         The limit is controlled by the 'max_partitions_per_insert_block' setting. \
         A large number of partitions is a common misconception: it leads to severe \
         negative performance impact. Partitions are intended for data manipulation \
         (drop partition, move partition), not for speeding up selects"
    )]
    TooManyParts {
        /// Configured partition limit for one insert block.
        limit: usize,
    },
    /// An internal invariant was violated; indicates a programmer error.
    #[error("logical error: {0}")]
    Logical(String),
    /// The storage policy could not satisfy the expected part size.
    #[error("cannot reserve {requested} bytes on any volume of the storage policy")]
    Reservation {
        /// Bytes that were requested.
        requested: u64,
    },
    /// The input block does not match the table metadata.
    #[error("block does not match table metadata: {0}")]
    SchemaMismatch(String),
    /// Filesystem operation failed; the temp directory is left to the janitor.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Arrow kernel failure while transforming the block.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet serialization failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl WriteError {
    pub(crate) fn logical(msg: impl Into<String>) -> Self {
        WriteError::Logical(msg.into())
    }
}
