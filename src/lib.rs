//! Insert-path part writer for a columnar, partitioned merge-tree engine.
//!
//! One call turns one logical block of rows into one or more immutable,
//! sorted, partition-scoped temporary parts:
//! - [`PartWriter::split_block_into_parts`] scatters the block by the
//!   table's partition key, enforcing the per-insert partition limit;
//! - [`PartWriter::write_temp_part`] sorts a partition's rows by the
//!   sorting key with a stable permutation, optionally pre-applies the
//!   table's merging mode, folds TTL and min/max summaries, reserves space
//!   on the storage policy and hands the block to the serializer, recursing
//!   into projection sub-parts;
//! - the returned [`TemporaryPart`] is published by the caller only after
//!   [`TemporaryPart::finalize`] succeeds.
//!
//! Blocks are [`arrow_array::RecordBatch`]es; the physical column store is
//! pluggable through [`SerializerFactory`], with a parquet-backed default.

mod calendar;
mod error;
mod expr;
mod logging;
mod metadata;
mod metrics;
mod minmax;
mod part;
mod partition;
mod projection;
mod reduce;
mod scatter;
mod serialization;
mod serializer;
mod settings;
mod sort;
mod storage;
mod ttl;
mod writer;

pub use error::WriteError;
pub use expr::{
    ColumnExpression, FnExpression, KeyExpression, ModuloExpression, StartOfMonthExpression,
};
pub use metadata::{SkipIndexDescription, TableMetadata, TableMetadataBuilder, TableTtls};
pub use metrics::WriterMetricsSnapshot;
pub use minmax::MinMaxIndex;
pub use part::{
    choose_part_type, choose_part_type_on_disk, FormatVersion, PartDescriptor, PartInfo, PartType,
};
pub use partition::{BlockWithPartition, PartitionTuple, PartitionValue};
pub use projection::{ProjectionDescription, ProjectionKind, ProjectionTransform};
pub use reduce::{
    GraphiteFunction, GraphitePattern, GraphiteRetention, GraphiteRollupParams, MergeInput,
    MergeStatus, MergeStrategy, MergingMode, MERGE_FN_METADATA_KEY,
};
pub use serialization::{SerializationInfos, SerializationKind};
pub use serializer::{
    choose_compression_codec, MergedPartStream, ParquetSerializerFactory, PartFinalizer,
    PartStream, SerializerFactory,
};
pub use settings::{WriterContext, WriterSettings};
pub use storage::{
    Disk, DirectorySyncGuard, PartStorageBuilder, Reservation, StoragePolicy, TempDirLock, Volume,
};
pub use ttl::{DestinationKind, MoveDestination, PartTtlInfos, TtlDescription, TtlInfo};
pub use writer::{PartWriter, Stream, TemporaryPart};
