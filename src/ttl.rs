//! TTL descriptions and per-part TTL summaries.
//!
//! A TTL expression yields a temporal column: either day numbers (`Date32`)
//! or unix seconds (`Timestamp(Second)` or `UInt32`). Day numbers convert
//! through the process-wide calendar. Each part records, per TTL entry, the
//! min/max over all rows; the rows-category entries additionally fold into a
//! part-wide summary that drives expiration decisions downstream.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_array::{Array, Date32Array, RecordBatch, TimestampSecondArray, UInt32Array};
use arrow_schema::{DataType, TimeUnit};
use serde::Serialize;

use crate::{calendar::CALENDAR, error::WriteError, expr::KeyExpression};

/// Where a move-TTL entry relocates expired parts.
#[derive(Clone, Debug)]
pub struct MoveDestination {
    /// Volume or disk.
    pub kind: DestinationKind,
    /// Name within the storage policy.
    pub name: String,
}

/// Kind of move-TTL destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationKind {
    /// A whole volume of the storage policy.
    Volume,
    /// A single disk.
    Disk,
}

/// One TTL entry of the table metadata.
#[derive(Clone)]
pub struct TtlDescription {
    /// Expression producing the temporal column.
    pub expression: Arc<dyn KeyExpression>,
    /// Destination, for move-TTL entries only.
    pub destination: Option<MoveDestination>,
}

impl std::fmt::Debug for TtlDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlDescription")
            .field("destination", &self.destination)
            .finish()
    }
}

impl TtlDescription {
    /// TTL entry with no destination (every category except moves).
    pub fn new(expression: Arc<dyn KeyExpression>) -> Self {
        Self {
            expression,
            destination: None,
        }
    }

    /// Move-TTL entry relocating expired parts to `destination`.
    pub fn with_destination(expression: Arc<dyn KeyExpression>, destination: MoveDestination) -> Self {
        Self {
            expression,
            destination: Some(destination),
        }
    }
}

/// Min/max unix seconds observed for one TTL entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TtlInfo {
    /// Earliest expiration across the part's rows.
    pub min: i64,
    /// Latest expiration across the part's rows.
    pub max: i64,
}

impl Default for TtlInfo {
    fn default() -> Self {
        Self {
            min: i64::MAX,
            max: i64::MIN,
        }
    }
}

impl TtlInfo {
    /// Fold one timestamp in.
    pub fn update(&mut self, unix_seconds: i64) {
        self.min = self.min.min(unix_seconds);
        self.max = self.max.max(unix_seconds);
    }

    /// Fold another summary in.
    pub fn merge(&mut self, other: &TtlInfo) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Whether no rows have been folded in.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// All TTL summaries of one part.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PartTtlInfos {
    /// Summary of the table-wide rows TTL.
    pub rows_ttl: TtlInfo,
    /// Per-expression summaries of `GROUP BY` TTLs.
    pub group_by_ttl: BTreeMap<String, TtlInfo>,
    /// Per-expression summaries of rows `WHERE` TTLs.
    pub rows_where_ttl: BTreeMap<String, TtlInfo>,
    /// Per-column TTL summaries.
    pub columns_ttl: BTreeMap<String, TtlInfo>,
    /// Per-expression recompression TTL summaries.
    pub recompression_ttl: BTreeMap<String, TtlInfo>,
    /// Per-expression move TTL summaries.
    pub moves_ttl: BTreeMap<String, TtlInfo>,
    /// Part-wide min/max over the rows-category entries.
    pub part_ttl: TtlInfo,
}

impl PartTtlInfos {
    /// Fold rows-category bounds into the part-wide summary.
    pub fn update_part_min_max(&mut self, min: i64, max: i64) {
        self.part_ttl.update(min);
        self.part_ttl.update(max);
    }

    /// Merge move-TTL summaries computed before reservation into this set.
    pub fn merge_moves(&mut self, other: &PartTtlInfos) {
        for (name, info) in &other.moves_ttl {
            self.moves_ttl
                .entry(name.clone())
                .or_default()
                .merge(info);
        }
    }

    /// Whether no TTL entry recorded anything.
    pub fn is_empty(&self) -> bool {
        self.rows_ttl.is_empty()
            && self.group_by_ttl.is_empty()
            && self.rows_where_ttl.is_empty()
            && self.columns_ttl.is_empty()
            && self.recompression_ttl.is_empty()
            && self.moves_ttl.is_empty()
    }
}

/// Evaluate one TTL entry over a block and fold it into a summary.
///
/// Single-row results broadcast as constants. Any column type other than the
/// temporal ones is a logical error: the metadata layer must have validated
/// the expression.
pub(crate) fn evaluate_ttl(entry: &TtlDescription, block: &RecordBatch) -> Result<TtlInfo, WriteError> {
    let column = entry.expression.evaluate(block)?;
    let mut info = TtlInfo::default();
    match column.data_type() {
        DataType::Date32 => {
            let arr = column
                .as_any()
                .downcast_ref::<Date32Array>()
                .expect("type checked above");
            for day in arr.values() {
                info.update(CALENDAR.from_day_num(*day));
            }
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            let arr = column
                .as_any()
                .downcast_ref::<TimestampSecondArray>()
                .expect("type checked above");
            for seconds in arr.values() {
                info.update(*seconds);
            }
        }
        DataType::UInt32 => {
            let arr = column
                .as_any()
                .downcast_ref::<UInt32Array>()
                .expect("type checked above");
            for seconds in arr.values() {
                info.update(i64::from(*seconds));
            }
        }
        other => {
            return Err(WriteError::logical(format!(
                "unexpected type of result TTL column: {other}"
            )))
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Date32Array, RecordBatch, TimestampSecondArray};
    use arrow_schema::{DataType, Field, Schema, TimeUnit};

    use super::{evaluate_ttl, TtlDescription};
    use crate::expr::ColumnExpression;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("d", DataType::Date32, false),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Second, None),
                false,
            ),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Date32Array::from(vec![3, 1, 2])),
                Arc::new(TimestampSecondArray::from(vec![500, 100, 300])),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn day_numbers_convert_to_unix_seconds() {
        let entry = TtlDescription::new(ColumnExpression::new("d"));
        let info = evaluate_ttl(&entry, &batch()).expect("evaluate");
        assert_eq!(info.min, 86400);
        assert_eq!(info.max, 3 * 86400);
    }

    #[test]
    fn timestamps_fold_directly_and_bound_every_row() {
        let entry = TtlDescription::new(ColumnExpression::new("ts"));
        let info = evaluate_ttl(&entry, &batch()).expect("evaluate");
        for v in [500i64, 100, 300] {
            assert!(info.min <= v && v <= info.max);
        }
        assert_eq!((info.min, info.max), (100, 500));
    }

    #[test]
    fn non_temporal_column_is_logical_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow_array::StringArray::from(vec!["x"]))],
        )
        .expect("batch");
        let entry = TtlDescription::new(ColumnExpression::new("s"));
        let err = evaluate_ttl(&entry, &batch).expect_err("must fail");
        assert!(matches!(err, crate::error::WriteError::Logical(_)));
    }
}
