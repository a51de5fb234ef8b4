//! Projection sub-parts written inside a parent temporary part.

use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;

use arrow_array::{Array, RecordBatch, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

use arbor::{
    BlockWithPartition, PartWriter, PartitionTuple, ProjectionDescription, ProjectionKind,
    StoragePolicy, TableMetadata, WriteError, WriterContext, MERGE_FN_METADATA_KEY,
};

const TABLE_PATH: &str = "store/proj-table";

fn parent_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::UInt32, false),
        Field::new("hits", DataType::UInt64, false),
    ]))
}

fn agg_child_schema() -> SchemaRef {
    let metadata: HashMap<String, String> =
        [(MERGE_FN_METADATA_KEY.to_owned(), "sum".to_owned())]
            .into_iter()
            .collect();
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::UInt32, false),
        Field::new("hits", DataType::UInt64, false).with_metadata(metadata),
    ]))
}

fn reproject(child: SchemaRef) -> impl Fn(&RecordBatch) -> Result<RecordBatch, WriteError> {
    move |block: &RecordBatch| {
        let columns = child
            .fields()
            .iter()
            .map(|field| {
                block
                    .column_by_name(field.name())
                    .cloned()
                    .ok_or_else(|| WriteError::SchemaMismatch(field.name().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordBatch::try_new(Arc::clone(&child), columns)?)
    }
}

fn read_rows(dir: &TempDir, relative: &str) -> RecordBatch {
    let file = File::open(dir.path().join(TABLE_PATH).join(relative).join("data.parquet"))
        .expect("data file");
    let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("builder")
        .build()
        .expect("reader");
    reader.next().expect("one batch").expect("batch")
}

#[test]
fn aggregate_projection_reduces_and_nests_under_parent() {
    let dir = TempDir::new().expect("tempdir");
    let child_schema = agg_child_schema();
    let child = Arc::new(
        TableMetadata::builder(Arc::clone(&child_schema))
            .sorting_key(["k"])
            .build()
            .expect("child metadata"),
    );
    let projection = ProjectionDescription::new(
        "by_key",
        ProjectionKind::Aggregate,
        Arc::clone(&child),
        Arc::new(reproject(child_schema)),
    );
    let metadata = TableMetadata::builder(parent_schema())
        .sorting_key(["k"])
        .projection(projection)
        .build()
        .expect("metadata");

    let writer = PartWriter::new(StoragePolicy::single_disk(dir.path()), TABLE_PATH);
    let block = RecordBatch::try_new(
        parent_schema(),
        vec![
            Arc::new(UInt32Array::from(vec![1, 1, 2])),
            Arc::new(UInt64Array::from(vec![2, 3, 5])),
        ],
    )
    .expect("batch");

    let mut temp_part = writer
        .write_temp_part(
            BlockWithPartition {
                block,
                partition: PartitionTuple::default(),
            },
            &metadata,
            &WriterContext::default(),
        )
        .expect("write");
    // Projection streams finalize together with the parent's.
    temp_part.finalize().expect("finalize");

    let part = temp_part.part.expect("part");
    assert_eq!(part.projections.len(), 1);
    let (name, sub_part) = &part.projections[0];
    assert_eq!(name, "by_key");
    assert_eq!(sub_part.info.partition_id, "all");
    assert_eq!(sub_part.info.min_block, 0);
    assert_eq!(sub_part.info.max_block, 0);
    // Aggregate projections always reduce, whatever the parent mode.
    assert_eq!(sub_part.rows, 2);

    let relative = format!("tmp_insert_{}/by_key.proj", part.name);
    let rows = read_rows(&dir, &relative);
    let hits = rows
        .column_by_name("hits")
        .unwrap()
        .as_any()
        .downcast_ref::<UInt64Array>()
        .unwrap();
    assert_eq!(hits.values().as_ref(), &[5, 5]);

    let proj_dir = dir.path().join(TABLE_PATH).join(&relative);
    assert!(proj_dir.join("checksums.txt").exists());
}

#[test]
fn temp_projection_parts_are_suffixed_and_marked_temp() {
    let dir = TempDir::new().expect("tempdir");
    let child_schema = parent_schema();
    let child = Arc::new(
        TableMetadata::builder(Arc::clone(&child_schema))
            .sorting_key(["hits"])
            .build()
            .expect("child metadata"),
    );
    let projection = ProjectionDescription::new(
        "resorted",
        ProjectionKind::Normal,
        Arc::clone(&child),
        Arc::new(reproject(child_schema)),
    );
    let metadata = TableMetadata::builder(parent_schema())
        .sorting_key(["k"])
        .build()
        .expect("metadata");

    let writer = PartWriter::new(StoragePolicy::single_disk(dir.path()), TABLE_PATH);
    let block = RecordBatch::try_new(
        parent_schema(),
        vec![
            Arc::new(UInt32Array::from(vec![1, 2])),
            Arc::new(UInt64Array::from(vec![9, 3])),
        ],
    )
    .expect("batch");

    let mut parent_part = writer
        .write_temp_part(
            BlockWithPartition {
                block: block.clone(),
                partition: PartitionTuple::default(),
            },
            &metadata,
            &WriterContext::default(),
        )
        .expect("parent write");
    let parent_storage = parent_part.storage.clone().expect("storage");
    let parent_descriptor = parent_part.part.as_ref().expect("descriptor");

    let mut projection_part = writer
        .write_temp_projection_part(
            block,
            &projection,
            &parent_storage,
            parent_descriptor,
            &WriterContext::default(),
            7,
        )
        .expect("projection write");
    projection_part.finalize().expect("finalize projection");
    parent_part.finalize().expect("finalize parent");

    let descriptor = projection_part.part.expect("projection descriptor");
    assert_eq!(descriptor.name, "resorted_7");
    assert!(descriptor.is_temp);

    let relative = format!(
        "tmp_insert_{}/resorted_7.tmp_proj",
        parent_part.part.expect("parent").name
    );
    let rows = read_rows(&dir, &relative);
    // The projection resorts by its own key.
    let hits = rows
        .column_by_name("hits")
        .unwrap()
        .as_any()
        .downcast_ref::<UInt64Array>()
        .unwrap();
    assert_eq!(hits.values().as_ref(), &[3, 9]);
}
