//! Replacing reduction: one survivor per sorting key.

use std::ops::Range;

use arrow_array::RecordBatch;

use crate::{error::WriteError, partition::PartitionValue, sort::take_batch};

use super::RowReducer;

pub(super) struct ReplacingReducer {
    version_column: Option<String>,
}

impl ReplacingReducer {
    pub(super) fn new(version_column: Option<String>) -> Self {
        Self { version_column }
    }
}

impl RowReducer for ReplacingReducer {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError> {
        let mut picked = Vec::with_capacity(classes.len());
        match &self.version_column {
            // Without a version the last inserted row wins.
            None => picked.extend(classes.iter().map(|r| (r.end - 1) as u32)),
            Some(name) => {
                let column = batch.column_by_name(name).ok_or_else(|| {
                    WriteError::SchemaMismatch(format!("version column '{name}' is missing"))
                })?;
                for range in classes {
                    let mut best = range.start;
                    let mut best_value = PartitionValue::from_array(column.as_ref(), range.start)?;
                    for row in range.start + 1..range.end {
                        let value = PartitionValue::from_array(column.as_ref(), row)?;
                        // >= keeps the later row on version ties.
                        if value.try_cmp(&best_value)?.is_ge() {
                            best = row;
                            best_value = value;
                        }
                    }
                    picked.push(best as u32);
                }
            }
        }
        take_batch(batch, &picked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, ArrayRef, Int64Array, UInt32Array};

    use crate::reduce::{merge_block, test_support::batch_of, MergingMode};

    #[test]
    fn max_version_survives() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![1, 1, 2])) as ArrayRef),
            ("v", Arc::new(UInt32Array::from(vec![10, 20, 5])) as ArrayRef),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Replacing {
                version_column: Some("v".to_owned()),
            },
        )
        .expect("merge");
        let versions = merged
            .column_by_name("v")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        assert_eq!(versions.values().as_ref(), &[20, 5]);
    }

    #[test]
    fn version_ties_keep_latest_row() {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(vec![1, 1])) as ArrayRef),
            ("v", Arc::new(UInt32Array::from(vec![7, 7])) as ArrayRef),
            ("payload", Arc::new(Int64Array::from(vec![100, 200])) as ArrayRef),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Replacing {
                version_column: Some("v".to_owned()),
            },
        )
        .expect("merge");
        let payload = merged
            .column_by_name("payload")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(payload.values().as_ref(), &[200]);
    }
}
