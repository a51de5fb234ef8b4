//! Part identity: naming, format versions, physical types, descriptors.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use ulid::Ulid;

use crate::{
    error::WriteError, minmax::MinMaxIndex, partition::PartitionTuple,
    serialization::SerializationInfos, settings::WriterSettings, ttl::PartTtlInfos,
};

/// On-disk naming scheme of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatVersion {
    /// Legacy monthly partitioning: names carry a `YYYYMMDD_YYYYMMDD` date
    /// range and the single partition column must be a date.
    V0,
    /// Custom partitioning: names carry the partition id.
    V1,
}

/// Physical layout of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartType {
    /// One file pair per column.
    Wide,
    /// All columns in one file.
    Compact,
    /// Kept in memory, durability via the write-ahead log.
    InMemory,
}

impl PartType {
    /// Whether parts of this type materialise a directory on disk.
    pub fn is_stored_on_disk(&self) -> bool {
        !matches!(self, PartType::InMemory)
    }
}

/// Identity of a part within its partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartInfo {
    /// Partition the part belongs to.
    pub partition_id: String,
    /// Smallest insert block number covered.
    pub min_block: i64,
    /// Largest insert block number covered.
    pub max_block: i64,
    /// Merge depth; freshly inserted parts are level 0.
    pub level: u32,
}

impl PartInfo {
    /// Info for a freshly inserted part: `lo == hi == temp_index`, level 0.
    pub fn new_insert(partition_id: String, temp_index: i64) -> Self {
        Self {
            partition_id,
            min_block: temp_index,
            max_block: temp_index,
            level: 0,
        }
    }

    /// `<partition_id>_<lo>_<hi>_<level>`.
    pub fn part_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.partition_id, self.min_block, self.max_block, self.level
        )
    }

    /// Legacy `YYYYMMDD_YYYYMMDD_lo_hi_level` name from a day-number range.
    pub fn part_name_v0(&self, min_yyyymmdd: u32, max_yyyymmdd: u32) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            min_yyyymmdd, max_yyyymmdd, self.min_block, self.max_block, self.level
        )
    }
}

/// Choose the physical part type for an expected size.
///
/// Falling below either wide-part threshold yields a compact part; falling
/// below the in-memory thresholds (when the in-memory WAL is enabled) keeps
/// the part off disk entirely.
pub fn choose_part_type(settings: &WriterSettings, bytes: u64, rows: u64) -> PartType {
    if settings.in_memory_parts_enable_wal
        && (bytes < settings.min_bytes_for_in_memory_part
            || rows < settings.min_rows_for_in_memory_part)
    {
        return PartType::InMemory;
    }
    choose_part_type_on_disk(settings, bytes, rows)
}

/// Choose between the on-disk part types only.
pub fn choose_part_type_on_disk(settings: &WriterSettings, bytes: u64, rows: u64) -> PartType {
    if bytes < settings.min_bytes_for_wide_part || rows < settings.min_rows_for_wide_part {
        PartType::Compact
    } else {
        PartType::Wide
    }
}

/// Metadata of one produced part, main or projection.
///
/// The descriptor is handed to the serializer, receives its on-disk byte
/// count at finalization, and travels inside the returned
/// [`TemporaryPart`](crate::writer::TemporaryPart) until the caller commits.
pub struct PartDescriptor {
    /// Directory-level name of the part.
    pub name: String,
    /// Identity within the partition.
    pub info: PartInfo,
    /// Physical layout.
    pub part_type: PartType,
    /// Partition tuple of every row.
    pub partition: PartitionTuple,
    /// Hyper-rectangle over the min/max columns.
    pub minmax: MinMaxIndex,
    /// TTL summaries.
    pub ttl_infos: PartTtlInfos,
    /// Rows actually written.
    pub rows: usize,
    /// Stored columns, with object-column types already concretised.
    pub columns: SchemaRef,
    /// Per-column serialization kinds.
    pub serialization: SerializationInfos,
    /// Part UUID, when the table assigns them.
    pub uuid: Option<Ulid>,
    /// Uncommitted until the caller publishes the part.
    pub is_temp: bool,
    /// Bytes on disk, known once the stream finalizes.
    pub bytes_on_disk: u64,
    /// Payload of in-memory parts.
    pub in_memory_block: Option<RecordBatch>,
    /// Projection sub-parts, by projection name.
    pub projections: Vec<(String, PartDescriptor)>,
}

impl PartDescriptor {
    pub(crate) fn new(
        name: String,
        info: PartInfo,
        part_type: PartType,
        partition: PartitionTuple,
        columns: SchemaRef,
    ) -> Self {
        Self {
            name,
            info,
            part_type,
            partition,
            minmax: MinMaxIndex::default(),
            ttl_infos: PartTtlInfos::default(),
            rows: 0,
            columns,
            serialization: SerializationInfos::default(),
            uuid: None,
            is_temp: false,
            bytes_on_disk: 0,
            in_memory_block: None,
            projections: Vec::new(),
        }
    }

    /// Whether the part materialises files.
    pub fn is_stored_on_disk(&self) -> bool {
        self.part_type.is_stored_on_disk()
    }
}

/// Derive the v0 date range from the min/max index.
///
/// The single partition column of a legacy table is a date; its min and max
/// must fall in the same month or the part name cannot be formed.
pub(crate) fn v0_date_range(
    minmax: &MinMaxIndex,
    date_column_pos: usize,
) -> Result<(u32, u32), WriteError> {
    use crate::calendar::CALENDAR;
    use crate::partition::PartitionValue;

    let interval = minmax
        .hyperrectangle()
        .get(date_column_pos)
        .ok_or_else(|| WriteError::logical("min/max index has no date column"))?;
    let (PartitionValue::Date(min_day), PartitionValue::Date(max_day)) = interval else {
        return Err(WriteError::logical(
            "legacy part naming requires a date min/max column",
        ));
    };
    if CALENDAR.to_num_yyyymm(*min_day) != CALENDAR.to_num_yyyymm(*max_day) {
        return Err(WriteError::logical("part spans more than one month"));
    }
    Ok((
        CALENDAR.to_num_yyyymmdd(*min_day),
        CALENDAR.to_num_yyyymmdd(*max_day),
    ))
}

#[cfg(test)]
mod tests {
    use super::{choose_part_type, v0_date_range, PartInfo, PartType};
    use crate::{minmax::MinMaxIndex, settings::WriterSettings};

    #[test]
    fn insert_part_names() {
        let info = PartInfo::new_insert("202401".to_owned(), 7);
        assert_eq!(info.part_name(), "202401_7_7_0");
        assert_eq!(info.part_name_v0(20240101, 20240131), "20240101_20240131_7_7_0");
    }

    #[test]
    fn part_type_thresholds() {
        let mut settings = WriterSettings::default();
        settings.min_bytes_for_wide_part = 1024;
        settings.min_rows_for_wide_part = 10;
        assert_eq!(choose_part_type(&settings, 100, 100), PartType::Compact);
        assert_eq!(choose_part_type(&settings, 4096, 5), PartType::Compact);
        assert_eq!(choose_part_type(&settings, 4096, 100), PartType::Wide);

        settings.in_memory_parts_enable_wal = true;
        settings.min_bytes_for_in_memory_part = 64;
        assert_eq!(choose_part_type(&settings, 32, 100), PartType::InMemory);
    }

    #[test]
    fn v0_range_rejects_month_spans() {
        use crate::partition::PartitionValue;
        use arrow_array::{Date32Array, RecordBatch};
        use arrow_schema::{DataType, Field, Schema};
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![Field::new("d", DataType::Date32, false)]));
        let batch = RecordBatch::try_new(
            schema,
            // 2024-01-31 .. 2024-02-01
            vec![Arc::new(Date32Array::from(vec![19753, 19754]))],
        )
        .expect("batch");
        let mut minmax = MinMaxIndex::default();
        minmax.update(&batch, &["d".to_owned()]).expect("update");
        assert!(matches!(
            minmax.hyperrectangle()[0].0,
            PartitionValue::Date(_)
        ));
        let err = v0_date_range(&minmax, 0).expect_err("must span two months");
        assert!(err.to_string().contains("more than one month"));
    }
}
