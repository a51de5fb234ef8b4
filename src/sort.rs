//! Sort planning: key evaluation, sortedness detection, stable permutations.
//!
//! The sorting key is compared through the arrow row format, which encodes a
//! tuple of columns into memcmp-ordered bytes. The same encoding later drives
//! partition hashing and the reducer's equivalence classes, so every consumer
//! agrees on ordering.

use arrow_array::{ArrayRef, RecordBatch, UInt32Array};
use arrow_row::{RowConverter, Rows, SortField};
use arrow_schema::{Field, Schema};
use arrow_select::take::take;
use std::sync::Arc;

use crate::{error::WriteError, metadata::TableMetadata};

/// Apply a permutation to every column of a batch.
pub(crate) fn take_batch(batch: &RecordBatch, indices: &[u32]) -> Result<RecordBatch, WriteError> {
    let indices = UInt32Array::from(indices.to_vec());
    let columns = batch
        .columns()
        .iter()
        .map(|column| take(column.as_ref(), &indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

/// Evaluate sort-key and skip-index expressions into the block.
///
/// Expressions whose result column is already present are skipped, so plain
/// column sort keys cost nothing.
pub(crate) fn evaluate_key_expressions(
    metadata: &TableMetadata,
    block: &RecordBatch,
) -> Result<RecordBatch, WriteError> {
    let mut appended: Vec<(String, ArrayRef)> = Vec::new();
    for expression in metadata
        .sort_key_expressions()
        .iter()
        .chain(metadata.skip_indices().iter().map(|i| &i.expression))
    {
        let name = expression.result_name();
        if block.column_by_name(name).is_some()
            || appended.iter().any(|(n, _)| n == name)
        {
            continue;
        }
        appended.push((name.to_owned(), expression.evaluate(block)?));
    }
    if appended.is_empty() {
        return Ok(block.clone());
    }

    let mut fields: Vec<Field> = block
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = block.columns().to_vec();
    for (name, column) in appended {
        fields.push(Field::new(name, column.data_type().clone(), true));
        columns.push(column);
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Encode the named columns into memcmp-ordered rows.
pub(crate) fn key_rows(block: &RecordBatch, columns: &[String]) -> Result<Rows, WriteError> {
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|name| {
            block.column_by_name(name).cloned().ok_or_else(|| {
                WriteError::SchemaMismatch(format!("sort column '{name}' is missing"))
            })
        })
        .collect::<Result<_, _>>()?;
    let fields: Vec<SortField> = arrays
        .iter()
        .map(|a| SortField::new(a.data_type().clone()))
        .collect();
    let converter = RowConverter::new(fields)?;
    Ok(converter.convert_columns(&arrays)?)
}

/// Single linear pass checking non-decreasing order.
pub(crate) fn is_already_sorted(rows: &Rows) -> bool {
    (1..rows.num_rows()).all(|i| rows.row(i - 1) <= rows.row(i))
}

/// Stable permutation producing non-decreasing order; ties keep input order.
pub(crate) fn stable_permutation(rows: &Rows) -> Vec<u32> {
    let mut indices: Vec<u32> = (0..rows.num_rows() as u32).collect();
    indices.sort_by(|&a, &b| rows.row(a as usize).cmp(&rows.row(b as usize)));
    indices
}
