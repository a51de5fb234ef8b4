//! Single-block pre-reduction.
//!
//! When `optimize_on_insert` is set, the writer applies the table's merging
//! mode to the freshly sorted block so that an insert leaves no adjacent
//! equivalent rows behind, semantically mirroring what a later background
//! merge would do. The block is fed to a merge strategy as a single sorted
//! run; the strategy is stepped exactly twice. The first step must request
//! more data from source 0, the second must finish. Any other outcome is a
//! logical error and aborts the write.

mod aggregating;
mod collapsing;
mod graphite;
mod replacing;
mod summing;
mod versioned;

use std::ops::Range;

use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field};

pub use graphite::{GraphiteFunction, GraphitePattern, GraphiteRetention, GraphiteRollupParams};

use crate::{error::WriteError, partition::PartitionValue, sort::take_batch};

/// Row-reduction semantics applied when combining equivalent rows.
#[derive(Clone, Debug)]
pub enum MergingMode {
    /// Keep every row.
    Ordinary,
    /// Keep one row per sorting key: highest version, or last inserted.
    Replacing {
        /// Column whose maximum decides the survivor; input order breaks ties.
        version_column: Option<String>,
    },
    /// Cancel +1/-1 row pairs sharing a sorting key.
    Collapsing {
        /// Int8 column holding `1` or `-1`.
        sign_column: String,
    },
    /// Keep one row per sorting key with numeric columns summed.
    Summing {
        /// Columns to sum; empty means every numeric non-key column.
        columns_to_sum: Vec<String>,
    },
    /// Merge aggregate-state columns, one row per sorting key.
    Aggregating,
    /// Like collapsing, but rows only cancel when their versions also match.
    VersionedCollapsing {
        /// Int8 column holding `1` or `-1`.
        sign_column: String,
        /// Column whose equality is required for cancellation.
        version_column: String,
    },
    /// Time-bucketed retention and rollup for metric series.
    Graphite {
        /// Rollup rules and column bindings.
        params: GraphiteRollupParams,
    },
}

/// Field-metadata key declaring an aggregate-state column and its merge
/// function (`sum`, `min`, `max` or `last`).
pub const MERGE_FN_METADATA_KEY: &str = "arbor.merge_fn";

/// One input run handed to a merge strategy.
pub struct MergeInput {
    /// The run's rows.
    pub chunk: RecordBatch,
    /// Permutation bringing the rows into sorting-key order, if any.
    pub permutation: Option<Vec<u32>>,
}

/// Outcome of one merge step.
pub struct MergeStatus {
    /// Source index the strategy wants more data from.
    pub required_source: Option<usize>,
    /// Whether the merge completed.
    pub is_finished: bool,
    /// The merged output, present on the finishing step.
    pub chunk: Option<RecordBatch>,
}

/// A merging algorithm driven by the two-step single-run protocol.
pub trait MergeStrategy: Send {
    /// Provide the input runs.
    fn initialize(&mut self, inputs: Vec<MergeInput>) -> Result<(), WriteError>;

    /// Advance the merge.
    fn step(&mut self) -> Result<MergeStatus, WriteError>;
}

/// Reduction applied to one sorted run, class by class.
trait RowReducer: Send {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError>;
}

/// Shared protocol skeleton: sorts the single input run, computes the
/// equivalence classes over `class_columns` and defers to a [`RowReducer`].
struct SingleRunStrategy<R: RowReducer> {
    class_columns: Vec<String>,
    reducer: R,
    output: Option<RecordBatch>,
    asked_for_more: bool,
    finished: bool,
}

impl<R: RowReducer> SingleRunStrategy<R> {
    fn new(class_columns: Vec<String>, reducer: R) -> Self {
        Self {
            class_columns,
            reducer,
            output: None,
            asked_for_more: false,
            finished: false,
        }
    }
}

impl<R: RowReducer> MergeStrategy for SingleRunStrategy<R> {
    fn initialize(&mut self, mut inputs: Vec<MergeInput>) -> Result<(), WriteError> {
        if inputs.len() != 1 {
            return Err(WriteError::logical(format!(
                "single-block merge expects exactly one input run, got {}",
                inputs.len()
            )));
        }
        let input = inputs.remove(0);
        let sorted = match input.permutation {
            Some(permutation) => take_batch(&input.chunk, &permutation)?,
            None => input.chunk,
        };
        let classes = class_ranges(&sorted, &self.class_columns)?;
        self.output = Some(self.reducer.reduce(&sorted, &classes)?);
        Ok(())
    }

    fn step(&mut self) -> Result<MergeStatus, WriteError> {
        if self.finished {
            return Err(WriteError::logical("merge stepped after completion"));
        }
        if !self.asked_for_more {
            self.asked_for_more = true;
            return Ok(MergeStatus {
                required_source: Some(0),
                is_finished: false,
                chunk: None,
            });
        }
        let chunk = self
            .output
            .take()
            .ok_or_else(|| WriteError::logical("merge stepped before initialization"))?;
        self.finished = true;
        Ok(MergeStatus {
            required_source: None,
            is_finished: true,
            chunk: Some(chunk),
        })
    }
}

/// Pick the strategy for a merging mode; `None` means nothing to reduce.
pub(crate) fn merging_strategy(
    mode: &MergingMode,
    sort_columns: &[String],
    partition_key_columns: &[String],
) -> Option<Box<dyn MergeStrategy>> {
    match mode {
        MergingMode::Ordinary => None,
        MergingMode::Replacing { version_column } => Some(Box::new(SingleRunStrategy::new(
            sort_columns.to_vec(),
            replacing::ReplacingReducer::new(version_column.clone()),
        ))),
        MergingMode::Collapsing { sign_column } => Some(Box::new(SingleRunStrategy::new(
            sort_columns.to_vec(),
            collapsing::CollapsingReducer::new(sign_column.clone()),
        ))),
        MergingMode::Summing { columns_to_sum } => Some(Box::new(SingleRunStrategy::new(
            sort_columns.to_vec(),
            summing::SummingReducer::new(
                columns_to_sum.clone(),
                sort_columns.to_vec(),
                partition_key_columns.to_vec(),
            ),
        ))),
        MergingMode::Aggregating => Some(Box::new(SingleRunStrategy::new(
            sort_columns.to_vec(),
            aggregating::AggregatingReducer,
        ))),
        MergingMode::VersionedCollapsing {
            sign_column,
            version_column,
        } => {
            let mut class_columns = sort_columns.to_vec();
            if !class_columns.iter().any(|c| c == version_column) {
                class_columns.push(version_column.clone());
            }
            Some(Box::new(SingleRunStrategy::new(
                class_columns,
                versioned::VersionedCollapsingReducer::new(sign_column.clone()),
            )))
        }
        MergingMode::Graphite { params } => {
            let now = params
                .now
                .unwrap_or_else(|| chrono::Utc::now().timestamp());
            Some(Box::new(SingleRunStrategy::new(
                Vec::new(),
                graphite::GraphiteReducer::new(params.clone(), now),
            )))
        }
    }
}

/// Reduce one block in place of a future background merge.
///
/// The permutation, when present, is consumed: the returned block is already
/// in sorting-key order and the caller must not apply it again.
pub(crate) fn merge_block(
    block: RecordBatch,
    sort_columns: &[String],
    partition_key_columns: &[String],
    permutation: &mut Option<Vec<u32>>,
    mode: &MergingMode,
) -> Result<RecordBatch, WriteError> {
    let Some(mut strategy) = merging_strategy(mode, sort_columns, partition_key_columns) else {
        return Ok(block);
    };

    let input = MergeInput {
        chunk: block,
        permutation: permutation.take(),
    };
    strategy.initialize(vec![input])?;

    let status = strategy.step()?;
    if status.required_source != Some(0) || status.is_finished {
        return Err(WriteError::logical(
            "required source after the first merge step is not 0",
        ));
    }
    let status = strategy.step()?;
    if !status.is_finished {
        return Err(WriteError::logical(
            "merge is not finished after the second step",
        ));
    }
    status
        .chunk
        .ok_or_else(|| WriteError::logical("finished merge produced no output chunk"))
}

/// Consecutive ranges of rows equal on `class_columns`.
///
/// An empty column list (or block) collapses to one range spanning the block.
fn class_ranges(
    batch: &RecordBatch,
    class_columns: &[String],
) -> Result<Vec<Range<usize>>, WriteError> {
    if class_columns.is_empty() || batch.num_rows() == 0 {
        return Ok(vec![0..batch.num_rows()]);
    }
    let arrays: Vec<ArrayRef> = class_columns
        .iter()
        .map(|name| {
            batch.column_by_name(name).cloned().ok_or_else(|| {
                WriteError::SchemaMismatch(format!("merge class column '{name}' is missing"))
            })
        })
        .collect::<Result<_, _>>()?;
    let partitions = arrow_ord::partition::partition(&arrays)?;
    Ok(partitions.ranges())
}

/// How an aggregate-state column merges across an equivalence class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AggregateMergeFn {
    Sum,
    Min,
    Max,
    Last,
}

impl AggregateMergeFn {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "last" => Some(Self::Last),
            _ => None,
        }
    }
}

/// The declared merge function of a field, if it is an aggregate state.
pub(crate) fn merge_fn_of(field: &Field) -> Option<AggregateMergeFn> {
    field
        .metadata()
        .get(MERGE_FN_METADATA_KEY)
        .and_then(|name| AggregateMergeFn::parse(name))
}

/// Fold an aggregate-state column over each class.
pub(crate) fn fold_over_ranges(
    array: &ArrayRef,
    ranges: &[Range<usize>],
    merge_fn: AggregateMergeFn,
) -> Result<ArrayRef, WriteError> {
    match merge_fn {
        AggregateMergeFn::Sum => sum_over_ranges(array, ranges),
        AggregateMergeFn::Last => take_column(array, &last_indices(ranges)),
        AggregateMergeFn::Min | AggregateMergeFn::Max => {
            let mut picked = Vec::with_capacity(ranges.len());
            for range in ranges {
                let mut best = range.start;
                let mut best_value = PartitionValue::from_array(array.as_ref(), range.start)?;
                for row in range.start + 1..range.end {
                    let value = PartitionValue::from_array(array.as_ref(), row)?;
                    let ordering = value.try_cmp(&best_value)?;
                    let better = match merge_fn {
                        AggregateMergeFn::Min => ordering.is_lt(),
                        _ => ordering.is_gt(),
                    };
                    if better {
                        best = row;
                        best_value = value;
                    }
                }
                picked.push(best as u32);
            }
            take_column(array, &picked)
        }
    }
}

/// Sum a numeric column over each class, keeping its type.
pub(crate) fn sum_over_ranges(
    array: &ArrayRef,
    ranges: &[Range<usize>],
) -> Result<ArrayRef, WriteError> {
    use arrow_array::{
        Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, UInt16Array,
        UInt32Array, UInt64Array, UInt8Array,
    };
    use std::sync::Arc;

    macro_rules! sum_as {
        ($ty:ty, $acc:ty, $out:ty) => {{
            let values = array
                .as_any()
                .downcast_ref::<$ty>()
                .expect("type checked by data_type match");
            let sums: Vec<_> = ranges
                .iter()
                .map(|range| {
                    let mut acc: $acc = Default::default();
                    for row in range.clone() {
                        if !values.is_null(row) {
                            acc = acc.wrapping_add(values.value(row) as $acc);
                        }
                    }
                    acc as $out
                })
                .collect();
            Arc::new(<$ty>::from(sums)) as ArrayRef
        }};
        (float $ty:ty, $out:ty) => {{
            let values = array
                .as_any()
                .downcast_ref::<$ty>()
                .expect("type checked by data_type match");
            let sums: Vec<_> = ranges
                .iter()
                .map(|range| {
                    let mut acc = 0.0f64;
                    for row in range.clone() {
                        if !values.is_null(row) {
                            acc += values.value(row) as f64;
                        }
                    }
                    acc as $out
                })
                .collect();
            Arc::new(<$ty>::from(sums)) as ArrayRef
        }};
    }

    Ok(match array.data_type() {
        DataType::Int8 => sum_as!(Int8Array, i64, i8),
        DataType::Int16 => sum_as!(Int16Array, i64, i16),
        DataType::Int32 => sum_as!(Int32Array, i64, i32),
        DataType::Int64 => sum_as!(Int64Array, i64, i64),
        DataType::UInt8 => sum_as!(UInt8Array, u64, u8),
        DataType::UInt16 => sum_as!(UInt16Array, u64, u16),
        DataType::UInt32 => sum_as!(UInt32Array, u64, u32),
        DataType::UInt64 => sum_as!(UInt64Array, u64, u64),
        DataType::Float32 => sum_as!(float Float32Array, f32),
        DataType::Float64 => sum_as!(float Float64Array, f64),
        other => {
            return Err(WriteError::SchemaMismatch(format!(
                "cannot sum non-numeric column of type {other}"
            )))
        }
    })
}

/// First row index of every class.
pub(crate) fn first_indices(ranges: &[Range<usize>]) -> Vec<u32> {
    ranges.iter().map(|r| r.start as u32).collect()
}

/// Last row index of every class.
pub(crate) fn last_indices(ranges: &[Range<usize>]) -> Vec<u32> {
    ranges.iter().map(|r| (r.end - 1) as u32).collect()
}

/// Apply a permutation to a single column.
pub(crate) fn take_column(array: &ArrayRef, indices: &[u32]) -> Result<ArrayRef, WriteError> {
    let indices = arrow_array::UInt32Array::from(indices.to_vec());
    Ok(arrow_select::take::take(array.as_ref(), &indices, None)?)
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, ArrayRef, Int64Array, StringArray};

    use super::{merge_block, test_support::batch_of, MergingMode};

    #[test]
    fn ordinary_keeps_block_and_permutation() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![2, 1])) as ArrayRef),
            ("v", Arc::new(StringArray::from(vec!["b", "a"])) as ArrayRef),
        ]);
        let mut permutation = Some(vec![1u32, 0]);
        let merged = merge_block(
            block.clone(),
            &["k".to_owned()],
            &[],
            &mut permutation,
            &MergingMode::Ordinary,
        )
        .expect("merge");
        assert_eq!(merged.num_rows(), 2);
        // Ordinary leaves the permutation for the serializer to apply.
        assert!(permutation.is_some());
    }

    #[test]
    fn replacing_consumes_permutation() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![2, 1])) as ArrayRef),
            ("v", Arc::new(StringArray::from(vec!["b", "a"])) as ArrayRef),
        ]);
        let mut permutation = Some(vec![1u32, 0]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut permutation,
            &MergingMode::Replacing {
                version_column: None,
            },
        )
        .expect("merge");
        assert!(permutation.is_none());
        let keys = merged
            .column_by_name("k")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(keys.values().as_ref(), &[1, 2]);
    }
}
