//! Aggregating reduction: merge declared aggregate states, one row per key.

use std::ops::Range;

use arrow_array::{ArrayRef, RecordBatch};

use crate::error::WriteError;

use super::{first_indices, fold_over_ranges, merge_fn_of, take_column, RowReducer};

pub(super) struct AggregatingReducer;

impl RowReducer for AggregatingReducer {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError> {
        let firsts = first_indices(classes);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            let reduced = match merge_fn_of(field) {
                Some(merge_fn) => fold_over_ranges(column, classes, merge_fn)?,
                None => take_column(column, &firsts)?,
            };
            columns.push(reduced);
        }
        Ok(RecordBatch::try_new(batch.schema(), columns)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow_array::{Array, Int64Array, RecordBatch, UInt64Array};
    use arrow_schema::{DataType, Field, Schema};

    use crate::reduce::{merge_block, MergingMode, MERGE_FN_METADATA_KEY};

    fn agg_field(name: &str, merge_fn: &str) -> Field {
        let metadata: HashMap<String, String> =
            [(MERGE_FN_METADATA_KEY.to_owned(), merge_fn.to_owned())]
                .into_iter()
                .collect();
        Field::new(name, DataType::UInt64, true).with_metadata(metadata)
    }

    #[test]
    fn states_merge_and_plain_columns_take_first() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            agg_field("total", "sum"),
            agg_field("low", "min"),
            Field::new("plain", DataType::UInt64, true),
        ]));
        let block = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 1, 2])),
                Arc::new(UInt64Array::from(vec![5, 6, 1])),
                Arc::new(UInt64Array::from(vec![9, 2, 7])),
                Arc::new(UInt64Array::from(vec![100, 200, 300])),
            ],
        )
        .expect("batch");

        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Aggregating,
        )
        .expect("merge");

        let get = |name: &str| -> Vec<u64> {
            merged
                .column_by_name(name)
                .unwrap()
                .as_any()
                .downcast_ref::<UInt64Array>()
                .unwrap()
                .values()
                .to_vec()
        };
        assert_eq!(get("total"), vec![11, 1]);
        assert_eq!(get("low"), vec![2, 7]);
        assert_eq!(get("plain"), vec![100, 300]);
    }
}
