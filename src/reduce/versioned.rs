//! Versioned collapsing: rows cancel only when key and version both match.

use std::ops::Range;

use arrow_array::{Array, Int8Array, RecordBatch};

use crate::{error::WriteError, sort::take_batch};

use super::RowReducer;

/// Classes handed to this reducer already group by sorting key *and*
/// version, so cancellation is purely a per-class count.
pub(super) struct VersionedCollapsingReducer {
    sign_column: String,
}

impl VersionedCollapsingReducer {
    pub(super) fn new(sign_column: String) -> Self {
        Self { sign_column }
    }
}

impl RowReducer for VersionedCollapsingReducer {
    fn reduce(
        &mut self,
        batch: &RecordBatch,
        classes: &[Range<usize>],
    ) -> Result<RecordBatch, WriteError> {
        let signs = batch
            .column_by_name(&self.sign_column)
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "sign column '{}' is missing",
                    self.sign_column
                ))
            })?
            .as_any()
            .downcast_ref::<Int8Array>()
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "sign column '{}' must be Int8",
                    self.sign_column
                ))
            })?
            .clone();

        let mut picked: Vec<u32> = Vec::new();
        for range in classes {
            let mut count_positive = 0isize;
            let mut count_negative = 0isize;
            for row in range.clone() {
                match signs.value(row) {
                    1 => count_positive += 1,
                    -1 => count_negative += 1,
                    other => {
                        return Err(WriteError::logical(format!(
                            "sign column value must be 1 or -1, got {other}"
                        )))
                    }
                }
            }
            let surplus = count_positive - count_negative;
            if surplus > 0 {
                // The last `surplus` positive rows survive.
                let mut keep: Vec<u32> = range
                    .clone()
                    .rev()
                    .filter(|&row| signs.value(row) == 1)
                    .take(surplus as usize)
                    .map(|row| row as u32)
                    .collect();
                keep.reverse();
                picked.extend(keep);
            } else if surplus < 0 {
                // The first `|surplus|` negative rows survive.
                picked.extend(
                    range
                        .clone()
                        .filter(|&row| signs.value(row) == -1)
                        .take(surplus.unsigned_abs())
                        .map(|row| row as u32),
                );
            }
        }
        take_batch(batch, &picked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, ArrayRef, Int64Array, Int8Array, UInt32Array};

    use crate::reduce::{merge_block, test_support::batch_of, MergingMode};

    fn collapse(keys: Vec<i64>, versions: Vec<u32>, signs: Vec<i8>) -> Vec<(i64, u32, i8)> {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(keys)) as ArrayRef),
            ("ver", Arc::new(UInt32Array::from(versions)) as ArrayRef),
            ("s", Arc::new(Int8Array::from(signs)) as ArrayRef),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::VersionedCollapsing {
                sign_column: "s".to_owned(),
                version_column: "ver".to_owned(),
            },
        )
        .expect("merge");
        let keys = merged
            .column_by_name("k")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let versions = merged
            .column_by_name("ver")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let signs = merged
            .column_by_name("s")
            .unwrap()
            .as_any()
            .downcast_ref::<Int8Array>()
            .unwrap();
        (0..merged.num_rows())
            .map(|i| (keys.value(i), versions.value(i), signs.value(i)))
            .collect()
    }

    #[test]
    fn equal_versions_cancel_pairwise() {
        let rows = collapse(vec![1, 1], vec![7, 7], vec![1, -1]);
        assert!(rows.is_empty());
    }

    #[test]
    fn different_versions_do_not_cancel() {
        let rows = collapse(vec![1, 1], vec![7, 8], vec![1, -1]);
        assert_eq!(rows, vec![(1, 7, 1), (1, 8, -1)]);
    }

    #[test]
    fn surplus_rows_survive() {
        let rows = collapse(vec![1, 1, 1], vec![7, 7, 7], vec![1, 1, -1]);
        assert_eq!(rows, vec![(1, 7, 1)]);
    }
}
