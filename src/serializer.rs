//! The serializer seam and the parquet-backed default implementation.
//!
//! The orchestrator only depends on the [`PartStream`] contract: write the
//! permuted block, then finalize into an on-disk part. The default
//! implementation stores the columns as a single parquet file plus the
//! sidecar files a part directory carries (`columns.txt`, `count.txt`,
//! `partition.dat`, min/max indices, TTL summaries, serialization kinds and
//! skip-index granules). Checksums are computed by the returned finalizer.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;

use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use parquet::{
    arrow::ArrowWriter,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};

use crate::{
    error::WriteError,
    metadata::TableMetadata,
    part::PartDescriptor,
    partition::PartitionValue,
    settings::WriterContext,
    sort::take_batch,
    storage::PartStorageBuilder,
};

/// Part sizes at or above this prefer the stronger codec.
const ZSTD_SIZE_THRESHOLD: u64 = 1024 * 1024 * 1024;
/// Part-to-table size ratios at or above this prefer the stronger codec.
const ZSTD_RATIO_THRESHOLD: f64 = 0.9;

/// Pick the compression codec for a part of the given size and relative size.
///
/// Called with `(0, 0.0)` on the insert path, which effectively selects the
/// cheapest codec; background merges pass real sizes.
pub fn choose_compression_codec(part_size: u64, part_size_ratio: f64) -> Compression {
    if part_size >= ZSTD_SIZE_THRESHOLD || part_size_ratio >= ZSTD_RATIO_THRESHOLD {
        Compression::ZSTD(ZstdLevel::default())
    } else {
        Compression::LZ4
    }
}

/// Pending completion of one part stream.
///
/// The write path schedules close-and-checksum work here instead of awaiting
/// it; [`TemporaryPart::finalize`](crate::writer::TemporaryPart::finalize)
/// drains every finalizer before the part counts as durable.
pub struct PartFinalizer {
    task: Option<Box<dyn FnOnce() -> Result<(), WriteError> + Send>>,
}

impl PartFinalizer {
    pub(crate) fn noop() -> Self {
        Self { task: None }
    }

    pub(crate) fn new(
        task: impl FnOnce() -> Result<(), WriteError> + Send + 'static,
    ) -> Self {
        Self {
            task: Some(Box::new(task)),
        }
    }

    /// Run the pending work; idempotent.
    pub fn finish(&mut self) -> Result<(), WriteError> {
        match self.task.take() {
            Some(task) => task(),
            None => Ok(()),
        }
    }
}

/// One open part being serialized.
pub trait PartStream: Send {
    /// Write the block, applying the permutation when one is supplied.
    fn write_with_permutation(
        &mut self,
        block: &RecordBatch,
        permutation: Option<&[u32]>,
    ) -> Result<(), WriteError>;

    /// Flush everything, stamp `part` with its on-disk size and return the
    /// finalizer performing checksum computation (and optional fsync).
    fn finalize_part_async(
        &mut self,
        part: &mut PartDescriptor,
        fsync_after_insert: bool,
    ) -> Result<PartFinalizer, WriteError>;
}

/// Opens part streams; the writer's pluggable serializer seam.
pub trait SerializerFactory: Send + Sync {
    /// Open a stream for one part.
    fn open_stream(
        &self,
        part: &PartDescriptor,
        storage: &PartStorageBuilder,
        metadata: &TableMetadata,
        columns: SchemaRef,
        codec: Compression,
        context: &WriterContext,
    ) -> Result<Box<dyn PartStream>, WriteError>;
}

/// Default factory producing [`MergedPartStream`]s.
pub struct ParquetSerializerFactory;

impl SerializerFactory for ParquetSerializerFactory {
    fn open_stream(
        &self,
        part: &PartDescriptor,
        storage: &PartStorageBuilder,
        metadata: &TableMetadata,
        columns: SchemaRef,
        codec: Compression,
        _context: &WriterContext,
    ) -> Result<Box<dyn PartStream>, WriteError> {
        let in_memory = !part.is_stored_on_disk();
        let writer = if in_memory {
            None
        } else {
            let file = File::create(storage.file_path("data.parquet"))?;
            let props = WriterProperties::builder().set_compression(codec).build();
            Some(ArrowWriter::try_new(file, columns.clone(), Some(props))?)
        };
        let skip_indices = metadata
            .skip_indices()
            .iter()
            .map(|index| SkipIndexState {
                name: index.name.clone(),
                column: index.expression.result_name().to_owned(),
                granularity: index.granularity.max(1),
                granules: Vec::new(),
            })
            .collect();
        Ok(Box::new(MergedPartStream {
            storage: storage.clone(),
            columns,
            minmax_columns: metadata.minmax_columns().to_vec(),
            skip_indices,
            writer,
            in_memory,
            staged: None,
        }))
    }
}

struct SkipIndexState {
    name: String,
    column: String,
    granularity: usize,
    granules: Vec<(PartitionValue, PartitionValue)>,
}

/// Parquet-backed part stream.
pub struct MergedPartStream {
    storage: PartStorageBuilder,
    columns: SchemaRef,
    minmax_columns: Vec<String>,
    skip_indices: Vec<SkipIndexState>,
    writer: Option<ArrowWriter<File>>,
    in_memory: bool,
    staged: Option<RecordBatch>,
}

impl MergedPartStream {
    fn project_columns(&self, block: &RecordBatch) -> Result<RecordBatch, WriteError> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.fields().len());
        for field in self.columns.fields() {
            let column = block.column_by_name(field.name()).ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "stored column '{}' is missing from the block",
                    field.name()
                ))
            })?;
            arrays.push(column.clone());
        }
        Ok(RecordBatch::try_new(self.columns.clone(), arrays)?)
    }

    fn accumulate_skip_indices(&mut self, block: &RecordBatch) -> Result<(), WriteError> {
        for index in &mut self.skip_indices {
            let column = block.column_by_name(&index.column).ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "skip index column '{}' is missing from the block",
                    index.column
                ))
            })?;
            let rows = block.num_rows();
            let mut start = 0;
            while start < rows {
                let end = (start + index.granularity).min(rows);
                let mut min = PartitionValue::from_array(column.as_ref(), start)?;
                let mut max = min.clone();
                for row in start + 1..end {
                    let value = PartitionValue::from_array(column.as_ref(), row)?;
                    if value.try_cmp(&min)?.is_lt() {
                        min = value.clone();
                    }
                    if value.try_cmp(&max)?.is_gt() {
                        max = value;
                    }
                }
                index.granules.push((min, max));
                start = end;
            }
        }
        Ok(())
    }
}

impl PartStream for MergedPartStream {
    fn write_with_permutation(
        &mut self,
        block: &RecordBatch,
        permutation: Option<&[u32]>,
    ) -> Result<(), WriteError> {
        let permuted = match permutation {
            Some(indices) => take_batch(block, indices)?,
            None => block.clone(),
        };
        self.accumulate_skip_indices(&permuted)?;
        let projected = self.project_columns(&permuted)?;
        if self.in_memory {
            self.staged = Some(projected);
            return Ok(());
        }
        self.writer
            .as_mut()
            .expect("on-disk stream always holds a writer")
            .write(&projected)?;
        Ok(())
    }

    fn finalize_part_async(
        &mut self,
        part: &mut PartDescriptor,
        fsync_after_insert: bool,
    ) -> Result<PartFinalizer, WriteError> {
        if self.in_memory {
            part.in_memory_block = self.staged.take();
            part.bytes_on_disk = 0;
            return Ok(PartFinalizer::noop());
        }

        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }

        {
            let mut columns_txt = File::create(self.storage.file_path("columns.txt"))?;
            writeln!(columns_txt, "columns format version: 1")?;
            writeln!(columns_txt, "{} columns:", self.columns.fields().len())?;
            for field in self.columns.fields() {
                writeln!(columns_txt, "`{}` {}", field.name(), field.data_type())?;
            }
        }

        std::fs::write(
            self.storage.file_path("count.txt"),
            format!("{}", part.rows),
        )?;

        if !part.partition.is_empty() {
            let rendered: Vec<String> =
                part.partition.0.iter().map(|v| v.to_string()).collect();
            std::fs::write(
                self.storage.file_path("partition.dat"),
                rendered.join("\n"),
            )?;
        }

        for (name, interval) in self
            .minmax_columns
            .iter()
            .zip(part.minmax.hyperrectangle())
        {
            std::fs::write(
                self.storage.file_path(&format!("minmax_{name}.idx")),
                format!("{}\n{}", interval.0, interval.1),
            )?;
        }

        if !part.ttl_infos.is_empty() {
            std::fs::write(
                self.storage.file_path("ttl.txt"),
                serde_json::to_string(&part.ttl_infos)
                    .map_err(|e| WriteError::logical(format!("ttl serialization failed: {e}")))?,
            )?;
        }

        std::fs::write(
            self.storage.file_path("serialization.json"),
            serde_json::to_string(&part.serialization)
                .map_err(|e| WriteError::logical(format!("serialization infos failed: {e}")))?,
        )?;

        for index in &self.skip_indices {
            let mut file = File::create(
                self.storage.file_path(&format!("skp_idx_{}.idx", index.name)),
            )?;
            for (min, max) in &index.granules {
                writeln!(file, "{min}\t{max}")?;
            }
        }

        if let Some(uuid) = part.uuid {
            std::fs::write(self.storage.file_path("uuid.txt"), uuid.to_string())?;
        }

        part.bytes_on_disk = directory_file_sizes(&self.storage.full_path())?;

        let dir = self.storage.full_path();
        Ok(PartFinalizer::new(move || {
            write_checksums(&dir, fsync_after_insert)
        }))
    }
}

fn directory_file_sizes(dir: &PathBuf) -> Result<u64, WriteError> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

fn write_checksums(dir: &PathBuf, fsync: bool) -> Result<(), WriteError> {
    use xxhash_rust::xxh3::xxh3_64;

    let mut lines = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.metadata()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    for name in &names {
        if name == "checksums.txt" {
            continue;
        }
        let bytes = std::fs::read(dir.join(name))?;
        lines.push(format!("{name}\t{}\t{:016x}", bytes.len(), xxh3_64(&bytes)));
    }
    let path = dir.join("checksums.txt");
    std::fs::write(&path, lines.join("\n"))?;

    if fsync {
        for name in &names {
            if let Ok(file) = File::open(dir.join(name)) {
                file.sync_all()?;
            }
        }
        File::open(&path)?.sync_all()?;
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use parquet::basic::Compression;

    use super::choose_compression_codec;

    #[test]
    fn insert_path_picks_the_cheap_codec() {
        assert_eq!(choose_compression_codec(0, 0.0), Compression::LZ4);
        assert!(matches!(
            choose_compression_codec(2 * 1024 * 1024 * 1024, 0.0),
            Compression::ZSTD(_)
        ));
    }
}
