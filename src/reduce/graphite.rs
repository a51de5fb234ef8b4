//! Graphite rollup: time-bucketed retention and aggregation for metric rows.
//!
//! Each row carries a metric path, a timestamp and a value. A pattern matched
//! against the path selects an aggregation function and a retention ladder;
//! the row's age relative to `now` picks the bucket precision. Rows of the
//! same path falling into the same bucket are folded into one. Rows matching
//! no pattern pass through unmodified.

use std::ops::Range;

use arrow_array::{
    Array, ArrayRef, Float64Array, RecordBatch, StringArray, TimestampSecondArray, UInt32Array,
};
use arrow_schema::{DataType, TimeUnit};

use crate::{error::WriteError, sort::take_batch};

use super::RowReducer;

/// Column bindings and rollup rules for Graphite reduction.
#[derive(Clone, Debug)]
pub struct GraphiteRollupParams {
    /// Column holding the metric path.
    pub path_column: String,
    /// Column holding the sample timestamp.
    pub time_column: String,
    /// Column holding the sample value.
    pub value_column: String,
    /// Rollup rules, matched in order.
    pub patterns: Vec<GraphitePattern>,
    /// Reference wall clock; `None` reads the process clock at dispatch.
    /// Write-time rollup bakes clock skew into data; background merges make
    /// the same choice, so both paths bucket identically.
    pub now: Option<i64>,
}

/// One rollup rule.
#[derive(Clone, Debug)]
pub struct GraphitePattern {
    /// Path prefix the rule applies to; `None` matches every path.
    pub metric_prefix: Option<String>,
    /// Aggregation folding the value column within a bucket.
    pub function: GraphiteFunction,
    /// Retention ladder; the entry with the largest age not exceeding the
    /// row's age decides the bucket precision.
    pub retentions: Vec<GraphiteRetention>,
}

impl GraphitePattern {
    fn matches(&self, path: &str) -> bool {
        match &self.metric_prefix {
            None => true,
            Some(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    fn precision_for_age(&self, age: i64) -> i64 {
        self.retentions
            .iter()
            .filter(|r| r.age_seconds <= age)
            .max_by_key(|r| r.age_seconds)
            .map(|r| r.precision_seconds.max(1))
            .unwrap_or(1)
    }
}

/// One rung of a retention ladder.
#[derive(Clone, Copy, Debug)]
pub struct GraphiteRetention {
    /// Minimum data age for this rung to apply.
    pub age_seconds: i64,
    /// Bucket width applied at that age.
    pub precision_seconds: i64,
}

/// Aggregation applied within one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphiteFunction {
    /// Sum of the values.
    Sum,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Arithmetic mean.
    Avg,
    /// Last value in input order.
    Last,
}

impl GraphiteFunction {
    fn fold(&self, values: &[f64]) -> f64 {
        match self {
            GraphiteFunction::Sum => values.iter().sum(),
            GraphiteFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            GraphiteFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            GraphiteFunction::Avg => values.iter().sum::<f64>() / values.len() as f64,
            GraphiteFunction::Last => *values.last().expect("buckets are never empty"),
        }
    }
}

pub(super) struct GraphiteReducer {
    params: GraphiteRollupParams,
    now: i64,
}

impl GraphiteReducer {
    pub(super) fn new(params: GraphiteRollupParams, now: i64) -> Self {
        Self { params, now }
    }
}

struct Bucket {
    last_row: usize,
    time: i64,
    values: Vec<f64>,
    function: Option<GraphiteFunction>,
}

impl RowReducer for GraphiteReducer {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        _classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError> {
        let paths = batch
            .column_by_name(&self.params.path_column)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned())
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "graphite path column '{}' must be Utf8",
                    self.params.path_column
                ))
            })?;
        let time_column = batch
            .column_by_name(&self.params.time_column)
            .cloned()
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "graphite time column '{}' is missing",
                    self.params.time_column
                ))
            })?;
        let times = time_values(&time_column)?;
        let values = batch
            .column_by_name(&self.params.value_column)
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>().cloned())
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "graphite value column '{}' must be Float64",
                    self.params.value_column
                ))
            })?;

        // Rows are sorted by (path, time), so bucket mates are adjacent.
        let mut buckets: Vec<Bucket> = Vec::new();
        for row in 0..batch.num_rows() {
            let path = paths.value(row);
            let time = times[row];
            let rule = self.params.patterns.iter().find(|p| p.matches(path));
            let (bucket_time, function) = match rule {
                Some(rule) => {
                    let precision = rule.precision_for_age(self.now - time);
                    (time - time.rem_euclid(precision), Some(rule.function))
                }
                None => (time, None),
            };

            let mergeable = buckets.last().is_some_and(|bucket| {
                bucket.function.is_some()
                    && function.is_some()
                    && bucket.time == bucket_time
                    && paths.value(bucket.last_row) == path
            });
            if mergeable {
                let bucket = buckets.last_mut().expect("checked non-empty above");
                bucket.last_row = row;
                bucket.values.push(values.value(row));
            } else {
                buckets.push(Bucket {
                    last_row: row,
                    time: bucket_time,
                    values: vec![values.value(row)],
                    function,
                });
            }
        }

        let last_rows: Vec<u32> = buckets.iter().map(|b| b.last_row as u32).collect();
        let bucket_times: Vec<i64> = buckets.iter().map(|b| b.time).collect();
        let folded: Vec<f64> = buckets
            .iter()
            .map(|b| match b.function {
                Some(function) => function.fold(&b.values),
                None => *b.values.last().expect("buckets are never empty"),
            })
            .collect();

        let taken = take_batch(batch, &last_rows)?;
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
        for (field, column) in taken.schema().fields().iter().zip(taken.columns()) {
            if field.name() == &self.params.time_column {
                columns.push(rebuild_time_column(&time_column, &bucket_times)?);
            } else if field.name() == &self.params.value_column {
                columns.push(std::sync::Arc::new(Float64Array::from(folded.clone())));
            } else {
                columns.push(column.clone());
            }
        }
        Ok(RecordBatch::try_new(taken.schema(), columns)?)
    }
}

fn time_values(column: &ArrayRef) -> Result<Vec<i64>, WriteError> {
    match column.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            let arr = column
                .as_any()
                .downcast_ref::<TimestampSecondArray>()
                .expect("type checked above");
            Ok(arr.values().iter().copied().collect())
        }
        DataType::UInt32 => {
            let arr = column
                .as_any()
                .downcast_ref::<UInt32Array>()
                .expect("type checked above");
            Ok(arr.values().iter().map(|v| i64::from(*v)).collect())
        }
        other => Err(WriteError::SchemaMismatch(format!(
            "graphite time column must hold unix seconds, got {other}"
        ))),
    }
}

fn rebuild_time_column(template: &ArrayRef, times: &[i64]) -> Result<ArrayRef, WriteError> {
    use std::sync::Arc;
    match template.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            Ok(Arc::new(TimestampSecondArray::from(times.to_vec())))
        }
        DataType::UInt32 => Ok(Arc::new(UInt32Array::from(
            times.iter().map(|t| *t as u32).collect::<Vec<_>>(),
        ))),
        other => Err(WriteError::logical(format!(
            "unexpected graphite time column type {other}"
        ))),
    }
}
