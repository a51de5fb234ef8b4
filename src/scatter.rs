//! Partition scattering: one insert block to one sub-block per partition.

use std::collections::{hash_map::Entry, HashMap};

use arrow_array::{Array, ArrayRef, RecordBatch, UInt32Array};
use arrow_row::{RowConverter, SortField};
use arrow_select::take::take;
use xxhash_rust::xxh3::xxh3_128;

use crate::{
    error::WriteError,
    metadata::TableMetadata,
    partition::{BlockWithPartition, PartitionTuple},
};

/// Split a block by the table's partition key.
///
/// Rows are grouped by a 128-bit hash of the partition tuple; the partition
/// limit is enforced the moment a new partition is discovered. With a single
/// partition the original block is returned untouched so computed partition
/// columns never leak into downstream key evaluation.
pub(crate) fn split_block_into_parts(
    block: &RecordBatch,
    max_parts: usize,
    metadata: &TableMetadata,
) -> Result<Vec<BlockWithPartition>, WriteError> {
    if block.num_rows() == 0 {
        return Ok(Vec::new());
    }
    metadata.check(block)?;

    if !metadata.has_partition_key() {
        return Ok(vec![BlockWithPartition {
            block: block.clone(),
            partition: PartitionTuple::default(),
        }]);
    }

    let partition_columns: Vec<ArrayRef> = metadata
        .partition_key()
        .iter()
        .map(|expression| expression.evaluate(block))
        .collect::<Result<_, _>>()?;
    for column in &partition_columns {
        if column.len() != block.num_rows() {
            return Err(WriteError::logical(
                "partition expression produced a column of mismatched length",
            ));
        }
    }

    let fields: Vec<SortField> = partition_columns
        .iter()
        .map(|column| SortField::new(column.data_type().clone()))
        .collect();
    let converter = RowConverter::new(fields)?;
    let rows = converter.convert_columns(&partition_columns)?;

    let num_rows = block.num_rows();
    let mut partitions_map: HashMap<u128, usize> = HashMap::new();
    let mut partition_num_to_first_row: Vec<usize> = Vec::new();
    // Deferred until a second partition shows up; rows seen before are
    // implicitly partition 0.
    let mut selector: Vec<usize> = Vec::new();
    let mut partitions_count = 0usize;

    for i in 0..num_rows {
        let key = xxh3_128(rows.row(i).as_ref());
        let mapped = match partitions_map.entry(key) {
            Entry::Occupied(occupied) => *occupied.get(),
            Entry::Vacant(vacant) => {
                if max_parts > 0 && partitions_count >= max_parts {
                    return Err(WriteError::TooManyParts { limit: max_parts });
                }
                partition_num_to_first_row.push(i);
                vacant.insert(partitions_count);
                partitions_count += 1;
                if partitions_count == 2 {
                    selector = vec![0; num_rows];
                }
                partitions_count - 1
            }
        };
        if partitions_count > 1 {
            selector[i] = mapped;
        }
    }

    let get_partition = |num: usize| -> Result<PartitionTuple, WriteError> {
        PartitionTuple::from_columns(&partition_columns, partition_num_to_first_row[num])
    };

    if partitions_count == 1 {
        return Ok(vec![BlockWithPartition {
            block: block.clone(),
            partition: get_partition(0)?,
        }]);
    }

    let mut row_indices: Vec<Vec<u32>> = vec![Vec::new(); partitions_count];
    for (i, partition) in selector.iter().enumerate() {
        row_indices[*partition].push(i as u32);
    }

    let mut result = Vec::with_capacity(partitions_count);
    for (num, indices) in row_indices.into_iter().enumerate() {
        let indices = UInt32Array::from(indices);
        let columns = block
            .columns()
            .iter()
            .map(|column| take(column.as_ref(), &indices, None))
            .collect::<Result<Vec<_>, _>>()?;
        result.push(BlockWithPartition {
            block: RecordBatch::try_new(block.schema(), columns)?,
            partition: get_partition(num)?,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Array, RecordBatch, StringArray, UInt32Array};
    use arrow_schema::{DataType, Field, Schema};

    use super::split_block_into_parts;
    use crate::{
        error::WriteError,
        expr::{ColumnExpression, ModuloExpression},
        metadata::TableMetadata,
        partition::PartitionValue,
    };

    fn batch(keys: Vec<u32>, tags: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::UInt32, false),
            Field::new("v", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt32Array::from(keys)),
                Arc::new(StringArray::from(tags)),
            ],
        )
        .expect("batch")
    }

    fn keys(block: &RecordBatch) -> Vec<u32> {
        block
            .column_by_name("k")
            .unwrap()
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn unpartitioned_returns_single_empty_tuple() {
        let metadata = TableMetadata::builder(batch(vec![], vec![]).schema())
            .sorting_key(["k"])
            .build()
            .expect("metadata");
        let block = batch(vec![1, 2], vec!["a", "b"]);
        let parts = split_block_into_parts(&block, 100, &metadata).expect("split");
        assert_eq!(parts.len(), 1);
        assert!(parts[0].partition.is_empty());
        assert_eq!(parts[0].block.num_rows(), 2);
    }

    #[test]
    fn scatter_preserves_rows_and_groups_by_tuple() {
        let metadata = TableMetadata::builder(batch(vec![], vec![]).schema())
            .partition_key([ModuloExpression::new("k", 2)])
            .build()
            .expect("metadata");
        let block = batch(vec![0, 1, 2, 3], vec!["a", "b", "c", "d"]);
        let parts = split_block_into_parts(&block, 100, &metadata).expect("split");
        assert_eq!(parts.len(), 2);
        // Discovery order: row 0 hits partition 0 first.
        assert_eq!(parts[0].partition.0, vec![PartitionValue::UInt(0)]);
        assert_eq!(parts[1].partition.0, vec![PartitionValue::UInt(1)]);
        assert_eq!(keys(&parts[0].block), vec![0, 2]);
        assert_eq!(keys(&parts[1].block), vec![1, 3]);

        let total: usize = parts.iter().map(|p| p.block.num_rows()).sum();
        assert_eq!(total, block.num_rows());
    }

    #[test]
    fn single_partition_returns_original_block() {
        let metadata = TableMetadata::builder(batch(vec![], vec![]).schema())
            .partition_key([ModuloExpression::new("k", 2)])
            .build()
            .expect("metadata");
        let block = batch(vec![2, 4, 6], vec!["a", "b", "c"]);
        let parts = split_block_into_parts(&block, 100, &metadata).expect("split");
        assert_eq!(parts.len(), 1);
        // The modulo result column must not leak into the sub-block.
        assert_eq!(parts[0].block.schema(), block.schema());
        assert_eq!(parts[0].partition.0, vec![PartitionValue::UInt(0)]);
    }

    #[test]
    fn too_many_parts_fires_on_discovery() {
        let metadata = TableMetadata::builder(batch(vec![], vec![]).schema())
            .partition_key([ColumnExpression::new("k")])
            .build()
            .expect("metadata");
        // Four distinct tuples, limit three.
        let block = batch(vec![1, 2, 3, 4], vec!["a", "b", "c", "d"]);
        let err = split_block_into_parts(&block, 3, &metadata).expect_err("limit");
        assert!(matches!(err, WriteError::TooManyParts { limit: 3 }));

        // Repeated tuples within the limit are fine.
        let block = batch(vec![1, 2, 3, 1, 2, 3], vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(
            split_block_into_parts(&block, 3, &metadata)
                .expect("split")
                .len(),
            3
        );
    }

    #[test]
    fn empty_block_yields_nothing() {
        let metadata = TableMetadata::builder(batch(vec![], vec![]).schema())
            .partition_key([ColumnExpression::new("k")])
            .build()
            .expect("metadata");
        let block = batch(vec![], vec![]);
        assert!(split_block_into_parts(&block, 1, &metadata)
            .expect("split")
            .is_empty());
    }
}
