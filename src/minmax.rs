//! Per-column min/max hyper-rectangle over the partition-key source columns.

use arrow_array::RecordBatch;

use crate::{error::WriteError, partition::PartitionValue};

/// Closed `[min, max]` interval per tracked column.
///
/// The cross-product of the intervals bounds the part's partition-key values
/// and backs both pruning and legacy (v0) part naming.
#[derive(Clone, Debug, Default)]
pub struct MinMaxIndex {
    intervals: Vec<(PartitionValue, PartitionValue)>,
    initialized: bool,
}

impl MinMaxIndex {
    /// Fold the named columns of `block` into the index.
    pub fn update(&mut self, block: &RecordBatch, column_names: &[String]) -> Result<(), WriteError> {
        if block.num_rows() == 0 {
            return Ok(());
        }
        let mut intervals = Vec::with_capacity(column_names.len());
        for name in column_names {
            let column = block.column_by_name(name).ok_or_else(|| {
                WriteError::SchemaMismatch(format!("min/max index column '{name}' is missing"))
            })?;
            let mut min = PartitionValue::from_array(column.as_ref(), 0)?;
            let mut max = min.clone();
            for row in 1..block.num_rows() {
                let value = PartitionValue::from_array(column.as_ref(), row)?;
                if value.try_cmp(&min)?.is_lt() {
                    min = value.clone();
                }
                if value.try_cmp(&max)?.is_gt() {
                    max = value;
                }
            }
            intervals.push((min, max));
        }

        if !self.initialized {
            self.intervals = intervals;
            self.initialized = true;
            return Ok(());
        }
        for (current, fresh) in self.intervals.iter_mut().zip(intervals) {
            if fresh.0.try_cmp(&current.0)?.is_lt() {
                current.0 = fresh.0;
            }
            if fresh.1.try_cmp(&current.1)?.is_gt() {
                current.1 = fresh.1;
            }
        }
        Ok(())
    }

    /// Whether any rows have been folded in.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The tracked intervals, in the order of the configured columns.
    pub fn hyperrectangle(&self) -> &[(PartitionValue, PartitionValue)] {
        &self.intervals
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Date32Array, Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    use super::MinMaxIndex;
    use crate::partition::PartitionValue;

    #[test]
    fn covers_all_rows() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("d", DataType::Date32, false),
            Field::new("v", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Date32Array::from(vec![19754, 19753, 19755])),
                Arc::new(Int64Array::from(vec![-5, 10, 3])),
            ],
        )
        .expect("batch");

        let mut index = MinMaxIndex::default();
        index
            .update(&batch, &["d".to_owned(), "v".to_owned()])
            .expect("update");
        let rect = index.hyperrectangle();
        assert_eq!(rect[0], (PartitionValue::Date(19753), PartitionValue::Date(19755)));
        assert_eq!(rect[1], (PartitionValue::Int(-5), PartitionValue::Int(10)));
    }
}
