//! Key expressions evaluated over blocks.
//!
//! The engine's SQL interpreter is an external collaborator; the writer only
//! consumes evaluated columns. [`KeyExpression`] is that seam: partition
//! keys, TTL expressions, skip-index expressions and computed sort-key
//! columns are all `Arc<dyn KeyExpression>`. The library impls below cover
//! the shapes the writer's own tests need; engines plug in their own.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Date32Array, Int64Array, UInt32Array, UInt64Array};
use arrow_schema::DataType;
use chrono::{Datelike, Days, NaiveDate};

use crate::error::WriteError;

/// An expression over the columns of a block, yielding one result column.
pub trait KeyExpression: Send + Sync {
    /// Name of the result column the expression produces.
    fn result_name(&self) -> &str;

    /// Evaluate the expression against the block, producing a column with one
    /// value per row (or a single value, treated as constant).
    fn evaluate(&self, block: &arrow_array::RecordBatch) -> Result<ArrayRef, WriteError>;
}

fn column<'a>(
    block: &'a arrow_array::RecordBatch,
    name: &str,
) -> Result<&'a ArrayRef, WriteError> {
    block
        .column_by_name(name)
        .ok_or_else(|| WriteError::SchemaMismatch(format!("missing column '{name}'")))
}

/// Identity expression over a single column.
pub struct ColumnExpression {
    name: String,
}

impl ColumnExpression {
    /// Reference the column with the given name.
    pub fn new(name: impl Into<String>) -> Arc<dyn KeyExpression> {
        Arc::new(Self { name: name.into() })
    }
}

impl KeyExpression for ColumnExpression {
    fn result_name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, block: &arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> {
        Ok(Arc::clone(column(block, &self.name)?))
    }
}

/// `column % modulus` over an integer column, yielding `UInt64`.
pub struct ModuloExpression {
    column: String,
    modulus: u64,
    result: String,
}

impl ModuloExpression {
    /// Build `column % modulus`.
    pub fn new(column: impl Into<String>, modulus: u64) -> Arc<dyn KeyExpression> {
        let column = column.into();
        let result = format!("modulo({column}, {modulus})");
        Arc::new(Self {
            column,
            modulus,
            result,
        })
    }
}

impl KeyExpression for ModuloExpression {
    fn result_name(&self) -> &str {
        &self.result
    }

    fn evaluate(&self, block: &arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> {
        let source = column(block, &self.column)?;
        let values: Vec<u64> = match source.data_type() {
            DataType::UInt64 => {
                let arr = source
                    .as_any()
                    .downcast_ref::<UInt64Array>()
                    .expect("type checked above");
                arr.values().iter().map(|v| v % self.modulus).collect()
            }
            DataType::UInt32 => {
                let arr = source
                    .as_any()
                    .downcast_ref::<UInt32Array>()
                    .expect("type checked above");
                arr.values()
                    .iter()
                    .map(|v| u64::from(*v) % self.modulus)
                    .collect()
            }
            DataType::Int64 => {
                let arr = source
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .expect("type checked above");
                arr.values()
                    .iter()
                    .map(|v| v.rem_euclid(self.modulus as i64) as u64)
                    .collect()
            }
            other => {
                return Err(WriteError::SchemaMismatch(format!(
                    "modulo partition expression expects an integer column, got {other}"
                )))
            }
        };
        Ok(Arc::new(UInt64Array::from(values)))
    }
}

/// Truncates a `Date32` column to the first day of its month.
///
/// The usual vehicle for month-granular partitioning.
pub struct StartOfMonthExpression {
    column: String,
    result: String,
}

impl StartOfMonthExpression {
    /// Build `toStartOfMonth(column)`.
    pub fn new(column: impl Into<String>) -> Arc<dyn KeyExpression> {
        let column = column.into();
        let result = format!("start_of_month({column})");
        Arc::new(Self { column, result })
    }
}

impl KeyExpression for StartOfMonthExpression {
    fn result_name(&self) -> &str {
        &self.result
    }

    fn evaluate(&self, block: &arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> {
        let source = column(block, &self.column)?;
        let arr = source
            .as_any()
            .downcast_ref::<Date32Array>()
            .ok_or_else(|| {
                WriteError::SchemaMismatch(format!(
                    "start_of_month expects a date column, got {}",
                    source.data_type()
                ))
            })?;
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("unix epoch is a valid date");
        let values: Vec<i32> = arr
            .values()
            .iter()
            .map(|days| {
                let date = epoch + Days::new(*days as u64);
                let first = date.with_day(1).expect("day 1 exists in every month");
                first.signed_duration_since(epoch).num_days() as i32
            })
            .collect();
        Ok(Arc::new(Date32Array::from(values)))
    }
}

/// Closure adapter for expressions the library does not model.
pub struct FnExpression {
    name: String,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(&arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> + Send + Sync>,
}

impl FnExpression {
    /// Wrap a closure as a key expression producing `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Arc<dyn KeyExpression>
    where
        F: Fn(&arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            func: Box::new(func),
        })
    }
}

impl KeyExpression for FnExpression {
    fn result_name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, block: &arrow_array::RecordBatch) -> Result<ArrayRef, WriteError> {
        (self.func)(block)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, Date32Array, RecordBatch, UInt32Array};
    use arrow_schema::{DataType, Field, Schema};

    use super::{ModuloExpression, StartOfMonthExpression};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::UInt32, false),
            Field::new("d", DataType::Date32, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt32Array::from(vec![0, 1, 2, 3])),
                // 2024-01-31 and 2024-02-01
                Arc::new(Date32Array::from(vec![19753, 19754, 19754, 19753])),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn modulo_expression() {
        let expr = ModuloExpression::new("k", 2);
        let col = expr.evaluate(&batch()).expect("evaluate");
        let col = col
            .as_any()
            .downcast_ref::<arrow_array::UInt64Array>()
            .expect("uint64 result");
        assert_eq!(col.values().as_ref(), &[0, 1, 0, 1]);
    }

    #[test]
    fn start_of_month_truncates() {
        let expr = StartOfMonthExpression::new("d");
        let col = expr.evaluate(&batch()).expect("evaluate");
        let col = col
            .as_any()
            .downcast_ref::<Date32Array>()
            .expect("date result");
        // 2024-01-01 is day 19723, 2024-02-01 is day 19754.
        assert_eq!(col.values().as_ref(), &[19723, 19754, 19754, 19723]);
    }
}
