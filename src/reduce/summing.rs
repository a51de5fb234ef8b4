//! Summing reduction: one row per sorting key with numeric columns summed.

use std::ops::Range;

use arrow_array::{ArrayRef, RecordBatch};

use crate::error::WriteError;

use super::{
    first_indices, fold_over_ranges, merge_fn_of, sum_over_ranges, take_column, RowReducer,
};

enum ColumnRole {
    Key,
    Summed,
    AggregateState(super::AggregateMergeFn),
    Other,
}

pub(super) struct SummingReducer {
    columns_to_sum: Vec<String>,
    sort_columns: Vec<String>,
    partition_key_columns: Vec<String>,
}

impl SummingReducer {
    pub(super) fn new(
        columns_to_sum: Vec<String>,
        sort_columns: Vec<String>,
        partition_key_columns: Vec<String>,
    ) -> Self {
        Self {
            columns_to_sum,
            sort_columns,
            partition_key_columns,
        }
    }

    fn role_of(&self, field: &arrow_schema::Field) -> Result<ColumnRole, WriteError> {
        let name = field.name();
        if let Some(merge_fn) = merge_fn_of(field) {
            return Ok(ColumnRole::AggregateState(merge_fn));
        }
        if self.sort_columns.iter().any(|c| c == name)
            || self.partition_key_columns.iter().any(|c| c == name)
        {
            return Ok(ColumnRole::Key);
        }
        if !self.columns_to_sum.is_empty() {
            if self.columns_to_sum.iter().any(|c| c == name) {
                if !field.data_type().is_numeric() {
                    return Err(WriteError::SchemaMismatch(format!(
                        "column '{name}' is listed for summing but has type {}",
                        field.data_type()
                    )));
                }
                return Ok(ColumnRole::Summed);
            }
            return Ok(ColumnRole::Other);
        }
        if field.data_type().is_numeric() {
            Ok(ColumnRole::Summed)
        } else {
            Ok(ColumnRole::Other)
        }
    }
}

impl RowReducer for SummingReducer {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError> {
        let firsts = first_indices(classes);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            let reduced = match self.role_of(field)? {
                ColumnRole::Summed => sum_over_ranges(column, classes)?,
                ColumnRole::AggregateState(merge_fn) => {
                    fold_over_ranges(column, classes, merge_fn)?
                }
                // Keys are equal across the class; everything else takes the
                // first row's value.
                ColumnRole::Key | ColumnRole::Other => take_column(column, &firsts)?,
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

    use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, StringArray, UInt64Array};
    use arrow_schema::{Field, Schema};

    use crate::reduce::{merge_block, test_support::batch_of, MergingMode, MERGE_FN_METADATA_KEY};

    fn sums(merged: &RecordBatch, name: &str) -> Vec<u64> {
        merged
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn explicit_columns_sum_and_others_take_first() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![1, 1, 2])) as ArrayRef),
            ("hits", Arc::new(UInt64Array::from(vec![3, 4, 5])) as ArrayRef),
            (
                "label",
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            ),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Summing {
                columns_to_sum: vec!["hits".to_owned()],
            },
        )
        .expect("merge");
        assert_eq!(sums(&merged, "hits"), vec![7, 5]);
        let labels = merged
            .column_by_name("label")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(labels.value(0), "a");
    }

    #[test]
    fn empty_list_sums_every_numeric_non_key_column() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![1, 1])) as ArrayRef),
            ("a", Arc::new(UInt64Array::from(vec![1, 2])) as ArrayRef),
            ("b", Arc::new(UInt64Array::from(vec![10, 20])) as ArrayRef),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Summing {
                columns_to_sum: Vec::new(),
            },
        )
        .expect("merge");
        assert_eq!(sums(&merged, "a"), vec![3]);
        assert_eq!(sums(&merged, "b"), vec![30]);
        let keys = merged
            .column_by_name("k")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(keys.values().as_ref(), &[1]);
    }

    #[test]
    fn aggregate_state_columns_merge_by_declared_fn() {
        let metadata: HashMap<String, String> = [(
            MERGE_FN_METADATA_KEY.to_owned(),
            "max".to_owned(),
        )]
        .into_iter()
        .collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", arrow_schema::DataType::Int64, true),
            Field::new("m", arrow_schema::DataType::UInt64, true).with_metadata(metadata),
        ]));
        let block = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 1])),
                Arc::new(UInt64Array::from(vec![4, 9])),
            ],
        )
        .expect("batch");
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Summing {
                columns_to_sum: Vec::new(),
            },
        )
        .expect("merge");
        assert_eq!(sums(&merged, "m"), vec![9]);
    }
}
