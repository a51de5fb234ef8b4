//! Partition tuples and their on-disk identifiers.

use std::cmp::Ordering;
use std::fmt;

use arrow_array::{
    Array, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, RecordBatch, StringArray, TimestampSecondArray,
    UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{DataType, TimeUnit};
use xxhash_rust::xxh3::xxh3_128;

use crate::{calendar::CALENDAR, error::WriteError};

/// A single value of a partition-key (or min/max index) column.
#[derive(Clone, Debug, PartialEq)]
pub enum PartitionValue {
    /// SQL null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any signed integer width.
    Int(i64),
    /// Any unsigned integer width.
    UInt(u64),
    /// Floating point, compared by IEEE total order of the raw value.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw binary.
    Bytes(Vec<u8>),
    /// Day number since the unix epoch.
    Date(i32),
    /// Unix seconds.
    Timestamp(i64),
}

impl PartitionValue {
    /// Extract the value at `row` from an arrow array.
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Self, WriteError> {
        if array.is_null(row) {
            return Ok(PartitionValue::Null);
        }
        macro_rules! extract {
            ($ty:ty, $variant:ident, $conv:expr) => {{
                let arr = array
                    .as_any()
                    .downcast_ref::<$ty>()
                    .expect("type checked by data_type match");
                PartitionValue::$variant(($conv)(arr.value(row)))
            }};
        }
        Ok(match array.data_type() {
            DataType::Boolean => extract!(BooleanArray, Bool, |v| v),
            DataType::Int8 => extract!(Int8Array, Int, |v| v as i64),
            DataType::Int16 => extract!(Int16Array, Int, |v| v as i64),
            DataType::Int32 => extract!(Int32Array, Int, |v| v as i64),
            DataType::Int64 => extract!(Int64Array, Int, |v| v),
            DataType::UInt8 => extract!(UInt8Array, UInt, |v| v as u64),
            DataType::UInt16 => extract!(UInt16Array, UInt, |v| v as u64),
            DataType::UInt32 => extract!(UInt32Array, UInt, |v| v as u64),
            DataType::UInt64 => extract!(UInt64Array, UInt, |v| v),
            DataType::Float32 => extract!(Float32Array, Float, |v| v as f64),
            DataType::Float64 => extract!(Float64Array, Float, |v| v),
            DataType::Utf8 => extract!(StringArray, String, |v: &str| v.to_owned()),
            DataType::Binary => extract!(BinaryArray, Bytes, |v: &[u8]| v.to_vec()),
            DataType::Date32 => extract!(Date32Array, Date, |v| v),
            DataType::Timestamp(TimeUnit::Second, _) => {
                extract!(TimestampSecondArray, Timestamp, |v| v)
            }
            other => {
                return Err(WriteError::SchemaMismatch(format!(
                    "unsupported partition-key column type {other}"
                )))
            }
        })
    }

    /// Order two values of the same variant; mixed variants are a logical error.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering, WriteError> {
        use PartitionValue::*;
        let ord = match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (a, b) => {
                return Err(WriteError::logical(format!(
                    "cannot order partition values of different kinds: {a:?} vs {b:?}"
                )))
            }
        };
        Ok(ord)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        use PartitionValue::*;
        match self {
            Null => buf.push(0),
            Bool(v) => {
                buf.push(1);
                buf.push(*v as u8);
            }
            Int(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            UInt(v) => {
                buf.push(3);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Float(v) => {
                buf.push(4);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            String(v) => {
                buf.push(5);
                buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            Bytes(v) => {
                buf.push(6);
                buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
                buf.extend_from_slice(v);
            }
            Date(v) => {
                buf.push(7);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Timestamp(v) => {
                buf.push(8);
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PartitionValue::*;
        match self {
            Null => write!(f, "NULL"),
            Bool(v) => write!(f, "{v}"),
            Int(v) => write!(f, "{v}"),
            UInt(v) => write!(f, "{v}"),
            Float(v) => write!(f, "{v}"),
            String(v) => write!(f, "{v}"),
            Bytes(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Date(v) => write!(f, "{}", CALENDAR.to_num_yyyymmdd(*v)),
            Timestamp(v) => write!(f, "{v}"),
        }
    }
}

/// The partition all rows of one sub-block belong to.
///
/// An empty tuple means the table is unpartitioned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionTuple(pub Vec<PartitionValue>);

impl PartitionTuple {
    /// Extract the tuple from the partition columns at `row`.
    pub(crate) fn from_columns(
        columns: &[arrow_array::ArrayRef],
        row: usize,
    ) -> Result<Self, WriteError> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            values.push(PartitionValue::from_array(column.as_ref(), row)?);
        }
        Ok(Self(values))
    }

    /// Whether the table is unpartitioned.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic identifier used in part names and directory layouts.
    ///
    /// Empty tuples map to `"all"`; a single integer or date renders as-is;
    /// everything else collapses to a 128-bit hash in hex.
    pub fn partition_id(&self) -> String {
        match self.0.as_slice() {
            [] => "all".to_owned(),
            [single @ (PartitionValue::Int(_)
            | PartitionValue::UInt(_)
            | PartitionValue::Date(_))] => single.to_string(),
            values => {
                let mut buf = Vec::new();
                for value in values {
                    value.encode_into(&mut buf);
                }
                format!("{:032x}", xxh3_128(&buf))
            }
        }
    }
}

/// A block paired with the partition tuple all its rows belong to.
#[derive(Debug)]
pub struct BlockWithPartition {
    /// The rows of one partition.
    pub block: RecordBatch,
    /// The partition those rows belong to.
    pub partition: PartitionTuple,
}

#[cfg(test)]
mod tests {
    use super::{PartitionTuple, PartitionValue};

    #[test]
    fn empty_tuple_is_all() {
        assert_eq!(PartitionTuple::default().partition_id(), "all");
    }

    #[test]
    fn single_integer_renders_directly() {
        let tuple = PartitionTuple(vec![PartitionValue::UInt(42)]);
        assert_eq!(tuple.partition_id(), "42");
        let tuple = PartitionTuple(vec![PartitionValue::Date(19753)]);
        assert_eq!(tuple.partition_id(), "20240131");
    }

    #[test]
    fn composite_tuple_hashes() {
        let a = PartitionTuple(vec![
            PartitionValue::UInt(1),
            PartitionValue::String("eu".into()),
        ]);
        let b = PartitionTuple(vec![
            PartitionValue::UInt(1),
            PartitionValue::String("us".into()),
        ]);
        assert_eq!(a.partition_id().len(), 32);
        assert_ne!(a.partition_id(), b.partition_id());
        assert_eq!(a.partition_id(), a.clone().partition_id());
    }
}
