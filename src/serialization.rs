//! Per-column serialization kinds.
//!
//! Columns dominated by default values (nulls, zeros, empty strings) are
//! marked for sparse serialization so the physical writer can store only the
//! non-default rows plus an offsets stream. The decision is made per part
//! from the actual block contents and the configured defaults ratio.

use std::collections::BTreeMap;

use arrow_array::{
    Array, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, RecordBatch, StringArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow_schema::DataType;
use serde::Serialize;

/// How one column is physically serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationKind {
    /// Dense, one physical value per row.
    Default,
    /// Non-default rows only, plus offsets.
    Sparse,
}

/// Serialization kind per column name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SerializationInfos(pub BTreeMap<String, SerializationKind>);

impl SerializationInfos {
    /// Decide the kind for every column of `block` present in `columns`.
    pub fn from_block(
        columns: &arrow_schema::Schema,
        block: &RecordBatch,
        defaults_ratio: f64,
    ) -> Self {
        let mut infos = BTreeMap::new();
        for field in columns.fields() {
            let Some(column) = block.column_by_name(field.name()) else {
                continue;
            };
            let rows = column.len();
            let kind = if rows == 0 {
                SerializationKind::Default
            } else {
                let defaults = count_defaults(column.as_ref());
                if (defaults as f64) / (rows as f64) >= defaults_ratio {
                    SerializationKind::Sparse
                } else {
                    SerializationKind::Default
                }
            };
            infos.insert(field.name().clone(), kind);
        }
        Self(infos)
    }
}

fn count_defaults(column: &dyn Array) -> usize {
    macro_rules! count_zeroes {
        ($ty:ty, $zero:expr) => {{
            let arr = column
                .as_any()
                .downcast_ref::<$ty>()
                .expect("type checked by data_type match");
            (0..arr.len())
                .filter(|&i| arr.is_null(i) || arr.value(i) == $zero)
                .count()
        }};
    }
    match column.data_type() {
        DataType::Boolean => count_zeroes!(BooleanArray, false),
        DataType::Int8 => count_zeroes!(Int8Array, 0),
        DataType::Int16 => count_zeroes!(Int16Array, 0),
        DataType::Int32 => count_zeroes!(Int32Array, 0),
        DataType::Int64 => count_zeroes!(Int64Array, 0),
        DataType::UInt8 => count_zeroes!(UInt8Array, 0),
        DataType::UInt16 => count_zeroes!(UInt16Array, 0),
        DataType::UInt32 => count_zeroes!(UInt32Array, 0),
        DataType::UInt64 => count_zeroes!(UInt64Array, 0),
        DataType::Float32 => count_zeroes!(Float32Array, 0.0),
        DataType::Float64 => count_zeroes!(Float64Array, 0.0),
        DataType::Utf8 => count_zeroes!(StringArray, ""),
        DataType::Binary => {
            let arr = column
                .as_any()
                .downcast_ref::<BinaryArray>()
                .expect("type checked by data_type match");
            (0..arr.len())
                .filter(|&i| arr.is_null(i) || arr.value(i).is_empty())
                .count()
        }
        _ => column.null_count(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{RecordBatch, UInt64Array};
    use arrow_schema::{DataType, Field, Schema};

    use super::{SerializationInfos, SerializationKind};

    #[test]
    fn mostly_zero_column_goes_sparse() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("dense", DataType::UInt64, false),
            Field::new("sparse", DataType::UInt64, false),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(UInt64Array::from(vec![1, 2, 3, 4])),
                Arc::new(UInt64Array::from(vec![0, 0, 0, 7])),
            ],
        )
        .expect("batch");

        let infos = SerializationInfos::from_block(&schema, &batch, 0.75);
        assert_eq!(infos.0["dense"], SerializationKind::Default);
        assert_eq!(infos.0["sparse"], SerializationKind::Sparse);
    }
}
