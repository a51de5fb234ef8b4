//! Collapsing reduction: +1/-1 row pairs cancel within a sorting key.

use std::ops::Range;

use arrow_array::{Array, Int8Array, RecordBatch};

use crate::{error::WriteError, logging::arbor_log, sort::take_batch};

use super::RowReducer;

const MAX_ANOMALY_REPORTS: usize = 10;

pub(super) struct CollapsingReducer {
    sign_column: String,
    reported: usize,
}

impl CollapsingReducer {
    pub(super) fn new(sign_column: String) -> Self {
        Self {
            sign_column,
            reported: 0,
        }
    }

    fn report_anomaly(&mut self, positive: usize, negative: usize) {
        if self.reported < MAX_ANOMALY_REPORTS {
            arbor_log!(
                log::Level::Warn,
                "collapsing_anomaly",
                "incorrect data: {positive} rows with sign=1 and {negative} rows with sign=-1 \
                 share one sorting key",
            );
        }
        self.reported += 1;
    }
}

impl RowReducer for CollapsingReducer {
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
            let mut count_positive = 0usize;
            let mut count_negative = 0usize;
            let mut first_negative = None;
            let mut last_positive = None;
            let mut last_is_positive = false;
            for row in range.clone() {
                match signs.value(row) {
                    1 => {
                        count_positive += 1;
                        last_positive = Some(row);
                        last_is_positive = true;
                    }
                    -1 => {
                        count_negative += 1;
                        first_negative.get_or_insert(row);
                        last_is_positive = false;
                    }
                    other => {
                        return Err(WriteError::logical(format!(
                            "sign column value must be 1 or -1, got {other}"
                        )))
                    }
                }
            }

            // Balanced classes ending on a negative row collapse entirely.
            if last_is_positive || count_positive != count_negative {
                if count_positive <= count_negative {
                    if let Some(row) = first_negative {
                        picked.push(row as u32);
                    }
                }
                if count_positive >= count_negative {
                    if let Some(row) = last_positive {
                        picked.push(row as u32);
                    }
                }
            }

            let imbalanced_pair = count_positive > 0
                && count_negative > 0
                && count_positive != count_negative;
            let off_by_more_than_one = count_positive.abs_diff(count_negative) > 1;
            if imbalanced_pair || off_by_more_than_one {
                self.report_anomaly(count_positive, count_negative);
            }
        }
        take_batch(batch, &picked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, ArrayRef, Int64Array, Int8Array};

    use crate::reduce::{merge_block, test_support::batch_of, MergingMode};

    fn collapse(keys: Vec<i64>, signs: Vec<i8>) -> (Vec<i64>, Vec<i8>) {
        let block = batch_of(vec![
            ("k", Arc::new(Int64Array::from(keys)) as ArrayRef),
            ("s", Arc::new(Int8Array::from(signs)) as ArrayRef),
        ]);
        let merged = merge_block(
            block,
            &["k".to_owned()],
            &[],
            &mut None,
            &MergingMode::Collapsing {
                sign_column: "s".to_owned(),
            },
        )
        .expect("merge");
        let keys = merged
            .column_by_name("k")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec();
        let signs = merged
            .column_by_name("s")
            .unwrap()
            .as_any()
            .downcast_ref::<Int8Array>()
            .unwrap()
            .values()
            .to_vec();
        (keys, signs)
    }

    #[test]
    fn balanced_pair_cancels() {
        let (keys, _) = collapse(vec![1, 1], vec![1, -1]);
        assert!(keys.is_empty());
    }

    #[test]
    fn surplus_positive_survives() {
        let (keys, signs) = collapse(vec![1, 1, 1], vec![1, 1, -1]);
        assert_eq!(keys, vec![1]);
        assert_eq!(signs, vec![1]);
    }

    #[test]
    fn balanced_ending_positive_keeps_both_sides() {
        let (keys, signs) = collapse(vec![1, 1], vec![-1, 1]);
        assert_eq!(keys, vec![1, 1]);
        assert_eq!(signs, vec![-1, 1]);
    }

    #[test]
    fn untouched_keys_pass_through() {
        let (keys, signs) = collapse(vec![1, 2], vec![1, 1]);
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(signs, vec![1, 1]);
    }
}
