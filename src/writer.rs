//! The write orchestrator: one insert block in, temporary parts out.
//!
//! `write_temp_part` runs the per-part state machine: pick columns, allocate
//! a temp index, compute the min/max index and the part name, lock the temp
//! directory, evaluate key expressions, sort, pre-reduce, fold TTLs, reserve
//! space, open the serializer, write projections and hand back a
//! [`TemporaryPart`]. Nothing is published here; the caller commits the
//! returned handle after `finalize()` succeeds. A failure after the
//! directory is created leaves it to the janitor, which collects temp
//! directories whose lifetime lock is gone.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use arrow_array::RecordBatch;
use ulid::Ulid;

use crate::{
    error::WriteError,
    logging::arbor_log,
    metadata::TableMetadata,
    metrics::{WriterMetrics, WriterMetricsSnapshot},
    minmax::MinMaxIndex,
    part::{
        choose_part_type, choose_part_type_on_disk, v0_date_range, FormatVersion, PartDescriptor,
        PartInfo, PartType,
    },
    partition::{BlockWithPartition, PartitionTuple},
    projection::{ProjectionDescription, ProjectionKind},
    reduce::{merge_block, MergingMode},
    scatter,
    serialization::SerializationInfos,
    serializer::{
        choose_compression_codec, ParquetSerializerFactory, PartFinalizer, PartStream,
        SerializerFactory,
    },
    settings::WriterContext,
    sort,
    storage::{
        DirectorySyncGuard, PartStorageBuilder, Reservation, StoragePolicy, TempDirLock,
    },
    ttl::{evaluate_ttl, PartTtlInfos},
};

const TMP_PREFIX: &str = "tmp_insert_";

/// An open serializer stream paired with its pending finalizer.
pub struct Stream {
    /// The serializer.
    pub stream: Box<dyn PartStream>,
    /// Completion that must run before the part is durable.
    pub finalizer: PartFinalizer,
}

/// A fully written but unpublished part.
///
/// Owns the temp directory's lifetime lock and the space reservation;
/// dropping the handle abandons the part and the janitor collects the
/// directory. Nothing is durable until [`finalize`](Self::finalize) returns.
pub struct TemporaryPart {
    /// The part descriptor; `None` when reduction left nothing to write.
    pub part: Option<PartDescriptor>,
    /// Storage builder of the part directory.
    pub storage: Option<PartStorageBuilder>,
    /// Streams of the part and all its projections.
    pub streams: Vec<Stream>,
    temporary_directory_lock: Option<TempDirLock>,
    _reservation: Option<Reservation>,
}

impl std::fmt::Debug for TemporaryPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryPart")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl TemporaryPart {
    /// Whether reduction produced no rows (and no files).
    pub fn is_empty(&self) -> bool {
        self.part.is_none()
    }

    /// Run every pending finalizer; blocks until all complete.
    pub fn finalize(&mut self) -> Result<(), WriteError> {
        for stream in &mut self.streams {
            stream.finalizer.finish()?;
        }
        Ok(())
    }

    fn empty(lock: Option<TempDirLock>) -> Self {
        Self {
            part: None,
            storage: None,
            streams: Vec::new(),
            temporary_directory_lock: lock,
            _reservation: None,
        }
    }
}

/// The insert-path part writer of one table.
pub struct PartWriter {
    policy: Arc<StoragePolicy>,
    relative_data_path: String,
    insert_increment: Arc<AtomicI64>,
    serializer: Arc<dyn SerializerFactory>,
    metrics: Arc<WriterMetrics>,
}

impl PartWriter {
    /// Writer for the table stored under `relative_data_path` on `policy`.
    pub fn new(policy: Arc<StoragePolicy>, relative_data_path: impl Into<String>) -> Self {
        Self {
            policy,
            relative_data_path: relative_data_path.into(),
            insert_increment: Arc::new(AtomicI64::new(1)),
            serializer: Arc::new(ParquetSerializerFactory),
            metrics: Arc::new(WriterMetrics::default()),
        }
    }

    /// Replace the serializer factory.
    pub fn with_serializer(mut self, serializer: Arc<dyn SerializerFactory>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Share a temp-index counter across writers of one engine instance.
    pub fn with_insert_increment(mut self, counter: Arc<AtomicI64>) -> Self {
        self.insert_increment = counter;
        self
    }

    /// Snapshot of the profile counters.
    pub fn metrics(&self) -> WriterMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Split a block by the table's partition key.
    ///
    /// Fails with [`WriteError::TooManyParts`] the moment the partition
    /// count exceeds `max_parts` (0 disables the check).
    pub fn split_block_into_parts(
        &self,
        block: &RecordBatch,
        max_parts: usize,
        metadata: &TableMetadata,
    ) -> Result<Vec<BlockWithPartition>, WriteError> {
        scatter::split_block_into_parts(block, max_parts, metadata)
    }

    /// Write one partition's rows as a temporary part.
    pub fn write_temp_part(
        &self,
        block_with_partition: BlockWithPartition,
        metadata: &TableMetadata,
        context: &WriterContext,
    ) -> Result<TemporaryPart, WriteError> {
        let settings = &context.settings;
        let BlockWithPartition { block, partition } = block_with_partition;
        if block.num_rows() == 0 {
            return Ok(TemporaryPart::empty(None));
        }
        metadata.check(&block)?;

        let columns = metadata.columns_for_block(&block);

        // Unique within this server process; read exactly once per call.
        let temp_index = self.insert_increment.fetch_add(1, Ordering::SeqCst);

        let mut minmax = MinMaxIndex::default();
        minmax.update(&block, metadata.minmax_columns())?;

        let info = PartInfo::new_insert(partition.partition_id(), temp_index);
        let part_name = match metadata.format_version() {
            FormatVersion::V0 => {
                let pos = metadata.minmax_date_column_pos()?;
                let (min_date, max_date) = v0_date_range(&minmax, pos)?;
                info.part_name_v0(min_date, max_date)
            }
            FormatVersion::V1 => info.part_name(),
        };
        let part_dir = format!("{TMP_PREFIX}{part_name}");

        let temp_dir_lock =
            TempDirLock::acquire(PathBuf::from(&self.relative_data_path).join(&part_dir))?;

        let block = if metadata.has_sorting_key() || metadata.has_skip_indices() {
            sort::evaluate_key_expressions(metadata, &block)?
        } else {
            block
        };

        let sort_columns = metadata.sorting_key().to_vec();
        self.metrics.record_block();

        let mut permutation: Option<Vec<u32>> = None;
        if !sort_columns.is_empty() {
            let rows = sort::key_rows(&block, &sort_columns)?;
            if sort::is_already_sorted(&rows) {
                self.metrics.record_block_already_sorted();
            } else {
                permutation = Some(sort::stable_permutation(&rows));
            }
        }

        let rows_before = block.num_rows();
        let partition_key_columns = metadata.partition_key_column_names();
        let block = if settings.optimize_on_insert {
            merge_block(
                block,
                &sort_columns,
                &partition_key_columns,
                &mut permutation,
                metadata.merging(),
            )?
        } else {
            block
        };

        // Reduction may leave nothing behind; an empty part is not an error
        // and must create no files.
        if block.num_rows() == 0 {
            return Ok(TemporaryPart::empty(Some(temp_dir_lock)));
        }
        if block.num_rows() != rows_before {
            // The stored index must cover exactly the written rows.
            let mut reduced = MinMaxIndex::default();
            reduced.update(&block, metadata.minmax_columns())?;
            minmax = reduced;
        }

        let expected_size = block.get_array_memory_size() as u64;

        let mut move_ttl_infos = PartTtlInfos::default();
        for entry in &metadata.ttls().moves {
            let ttl = evaluate_ttl(entry, &block)?;
            move_ttl_infos
                .moves_ttl
                .entry(entry.expression.result_name().to_owned())
                .or_default()
                .merge(&ttl);
        }

        let now = chrono::Utc::now().timestamp();
        let reservation =
            self.policy
                .reserve_preferring_ttl_rules(metadata, expected_size, &move_ttl_infos, now)?;
        let storage = PartStorageBuilder::new(
            Arc::clone(reservation.disk()),
            self.relative_data_path.clone(),
            part_dir,
        );

        let part_type = choose_part_type(settings, expected_size, block.num_rows() as u64);
        let mut part = PartDescriptor::new(part_name, info, part_type, partition, columns.clone());
        if settings.assign_part_uuids {
            part.uuid = Some(Ulid::new());
        }
        part.serialization = SerializationInfos::from_block(
            &columns,
            &block,
            settings.ratio_of_defaults_for_sparse_serialization,
        );
        part.rows = block.num_rows();
        part.minmax = minmax;
        part.is_temp = true;

        let mut sync_guard = None;
        if part.is_stored_on_disk() {
            if storage.exists() {
                // Stale files from a previous run can shadow the name.
                arbor_log!(
                    log::Level::Warn,
                    "stale_temp_dir",
                    "removing old temporary directory {}",
                    storage.full_path().display(),
                );
                storage.remove_recursive()?;
            }
            storage.create_directories()?;
            if settings.fsync_part_directory {
                sync_guard = Some(DirectorySyncGuard::new(&storage.full_path())?);
            }
        }

        let ttls = metadata.ttls();
        if let Some(entry) = &ttls.rows {
            let ttl = evaluate_ttl(entry, &block)?;
            part.ttl_infos.rows_ttl.merge(&ttl);
            if !ttl.is_empty() {
                part.ttl_infos.update_part_min_max(ttl.min, ttl.max);
            }
        }
        for entry in &ttls.group_by {
            let ttl = evaluate_ttl(entry, &block)?;
            part.ttl_infos
                .group_by_ttl
                .entry(entry.expression.result_name().to_owned())
                .or_default()
                .merge(&ttl);
            if !ttl.is_empty() {
                part.ttl_infos.update_part_min_max(ttl.min, ttl.max);
            }
        }
        for entry in &ttls.rows_where {
            let ttl = evaluate_ttl(entry, &block)?;
            part.ttl_infos
                .rows_where_ttl
                .entry(entry.expression.result_name().to_owned())
                .or_default()
                .merge(&ttl);
            if !ttl.is_empty() {
                part.ttl_infos.update_part_min_max(ttl.min, ttl.max);
            }
        }
        for (column, entry) in &ttls.columns {
            let ttl = evaluate_ttl(entry, &block)?;
            part.ttl_infos
                .columns_ttl
                .entry(column.clone())
                .or_default()
                .merge(&ttl);
            if !ttl.is_empty() {
                part.ttl_infos.update_part_min_max(ttl.min, ttl.max);
            }
        }
        for entry in &ttls.recompression {
            let ttl = evaluate_ttl(entry, &block)?;
            part.ttl_infos
                .recompression_ttl
                .entry(entry.expression.result_name().to_owned())
                .or_default()
                .merge(&ttl);
        }
        part.ttl_infos.merge_moves(&move_ttl_infos);

        let codec = choose_compression_codec(0, 0.0);
        let mut stream =
            self.serializer
                .open_stream(&part, &storage, metadata, columns, codec, context)?;
        stream.write_with_permutation(&block, permutation.as_deref())?;

        let mut streams: Vec<Stream> = Vec::new();
        for projection in metadata.projections() {
            let projection_block = projection.transform.calculate(&block)?;
            if projection_block.num_rows() == 0 {
                continue;
            }
            let mut projection_part =
                self.write_projection_part(projection_block, projection, &storage, &part, context)?;
            if let Some(descriptor) = projection_part.part.take() {
                part.projections.push((projection.name.clone(), descriptor));
            }
            streams.append(&mut projection_part.streams);
        }

        let finalizer = stream.finalize_part_async(&mut part, settings.fsync_after_insert)?;
        streams.push(Stream { stream, finalizer });

        self.metrics
            .record_written(part.rows as u64, expected_size, part.bytes_on_disk);

        drop(sync_guard);
        Ok(TemporaryPart {
            part: Some(part),
            storage: Some(storage),
            streams,
            temporary_directory_lock: Some(temp_dir_lock),
            _reservation: Some(reservation),
        })
    }

    /// Write a projection block as a `<name>.proj` sub-part of `parent`.
    pub fn write_projection_part(
        &self,
        block: RecordBatch,
        projection: &ProjectionDescription,
        parent_storage: &PartStorageBuilder,
        parent: &PartDescriptor,
        context: &WriterContext,
    ) -> Result<TemporaryPart, WriteError> {
        let part_name = projection.name.clone();
        let part_type = self.projection_part_type(&block, parent, parent_storage, context)?;
        self.write_projection_part_impl(
            part_name.clone(),
            part_type,
            format!("{part_name}.proj"),
            parent_storage,
            false,
            block,
            projection,
            context,
        )
    }

    /// Write a projection block as a temporary `<name>_<block>.tmp_proj`
    /// sub-part, used while re-materialising a projection over many blocks.
    pub fn write_temp_projection_part(
        &self,
        block: RecordBatch,
        projection: &ProjectionDescription,
        parent_storage: &PartStorageBuilder,
        parent: &PartDescriptor,
        context: &WriterContext,
        block_num: usize,
    ) -> Result<TemporaryPart, WriteError> {
        let part_name = format!("{}_{}", projection.name, block_num);
        let part_type = self.projection_part_type(&block, parent, parent_storage, context)?;
        self.write_projection_part_impl(
            part_name.clone(),
            part_type,
            format!("{part_name}.tmp_proj"),
            parent_storage,
            true,
            block,
            projection,
            context,
        )
    }

    fn projection_part_type(
        &self,
        block: &RecordBatch,
        parent: &PartDescriptor,
        parent_storage: &PartStorageBuilder,
        context: &WriterContext,
    ) -> Result<PartType, WriteError> {
        if parent.part_type == PartType::InMemory {
            return Ok(PartType::InMemory);
        }
        let expected_size = block.get_array_memory_size() as u64;
        // Transient reservation: only checks the parent volume has room.
        let _space_check =
            Reservation::on_disk(Arc::clone(parent_storage.disk()), expected_size)?;
        Ok(choose_part_type_on_disk(
            &context.settings,
            expected_size,
            block.num_rows() as u64,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_projection_part_impl(
        &self,
        part_name: String,
        part_type: PartType,
        relative_dir: String,
        parent_storage: &PartStorageBuilder,
        is_temp: bool,
        block: RecordBatch,
        projection: &ProjectionDescription,
        context: &WriterContext,
    ) -> Result<TemporaryPart, WriteError> {
        let metadata = projection.metadata.as_ref();
        metadata.check(&block)?;
        let columns = metadata.columns_for_block(&block);

        // Projection parts all live in the synthetic "all" partition with a
        // zero block range; their identity is the parent's.
        let info = PartInfo {
            partition_id: "all".to_owned(),
            min_block: 0,
            max_block: 0,
            level: 0,
        };
        let storage = parent_storage.projection(&relative_dir);
        let mut part = PartDescriptor::new(
            part_name,
            info,
            part_type,
            PartitionTuple::default(),
            columns.clone(),
        );
        part.is_temp = is_temp;
        part.serialization = SerializationInfos::from_block(
            &columns,
            &block,
            context.settings.ratio_of_defaults_for_sparse_serialization,
        );

        if part.is_stored_on_disk() {
            if storage.exists() {
                arbor_log!(
                    log::Level::Warn,
                    "stale_temp_dir",
                    "removing old temporary directory {}",
                    storage.full_path().display(),
                );
                storage.remove_recursive()?;
            }
            storage.create_directories()?;
        }

        let block = if metadata.has_sorting_key() || metadata.has_skip_indices() {
            sort::evaluate_key_expressions(metadata, &block)?
        } else {
            block
        };

        let sort_columns = metadata.sorting_key().to_vec();
        self.metrics.record_projection_block();

        let mut permutation: Option<Vec<u32>> = None;
        if !sort_columns.is_empty() {
            let rows = sort::key_rows(&block, &sort_columns)?;
            if sort::is_already_sorted(&rows) {
                self.metrics.record_projection_block_already_sorted();
            } else {
                permutation = Some(sort::stable_permutation(&rows));
            }
        }

        let block = if projection.kind == ProjectionKind::Aggregate {
            merge_block(
                block,
                &sort_columns,
                &[],
                &mut permutation,
                &MergingMode::Aggregating,
            )?
        } else {
            block
        };

        part.rows = block.num_rows();
        let expected_size = block.get_array_memory_size() as u64;

        let codec = choose_compression_codec(0, 0.0);
        let mut stream =
            self.serializer
                .open_stream(&part, &storage, metadata, columns, codec, context)?;
        stream.write_with_permutation(&block, permutation.as_deref())?;
        let finalizer = stream.finalize_part_async(&mut part, false)?;

        self.metrics
            .record_projection_written(part.rows as u64, expected_size, part.bytes_on_disk);

        Ok(TemporaryPart {
            part: Some(part),
            storage: Some(storage),
            streams: vec![Stream { stream, finalizer }],
            temporary_directory_lock: None,
            _reservation: None,
        })
    }
}
