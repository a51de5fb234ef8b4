//! Table metadata snapshot consumed by the writer.
//!
//! The catalog owns the authoritative table definition; the writer receives
//! an immutable snapshot per insert. The snapshot carries everything the
//! insert path consults: physical columns, partition key, sorting key, skip
//! indices, TTL entries of every category, projections, the merging mode and
//! the on-disk format version.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};

use crate::{
    error::WriteError,
    expr::KeyExpression,
    part::FormatVersion,
    projection::ProjectionDescription,
    reduce::MergingMode,
    ttl::TtlDescription,
};

/// One skip index built alongside the part.
#[derive(Clone)]
pub struct SkipIndexDescription {
    /// Index name, also the on-disk file stem.
    pub name: String,
    /// Expression producing the indexed column.
    pub expression: Arc<dyn KeyExpression>,
    /// Rows per index granule.
    pub granularity: usize,
}

impl std::fmt::Debug for SkipIndexDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipIndexDescription")
            .field("name", &self.name)
            .field("granularity", &self.granularity)
            .finish()
    }
}

/// TTL entries grouped by category.
#[derive(Clone, Default, Debug)]
pub struct TableTtls {
    /// Table-wide rows TTL.
    pub rows: Option<TtlDescription>,
    /// `GROUP BY` TTLs.
    pub group_by: Vec<TtlDescription>,
    /// Rows `WHERE` TTLs.
    pub rows_where: Vec<TtlDescription>,
    /// Per-column TTLs.
    pub columns: Vec<(String, TtlDescription)>,
    /// Recompression TTLs.
    pub recompression: Vec<TtlDescription>,
    /// Move TTLs.
    pub moves: Vec<TtlDescription>,
}

impl TableTtls {
    /// Whether any category has an entry.
    pub fn is_empty(&self) -> bool {
        self.rows.is_none()
            && self.group_by.is_empty()
            && self.rows_where.is_empty()
            && self.columns.is_empty()
            && self.recompression.is_empty()
            && self.moves.is_empty()
    }
}

/// Immutable snapshot of a table definition.
pub struct TableMetadata {
    schema: SchemaRef,
    partition_key: Vec<Arc<dyn KeyExpression>>,
    minmax_columns: Vec<String>,
    sorting_key: Vec<String>,
    sort_key_expressions: Vec<Arc<dyn KeyExpression>>,
    skip_indices: Vec<SkipIndexDescription>,
    ttls: TableTtls,
    projections: Vec<ProjectionDescription>,
    merging: MergingMode,
    format_version: FormatVersion,
    object_columns: Vec<String>,
}

impl std::fmt::Debug for TableMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetadata")
            .field("schema", &self.schema)
            .field("minmax_columns", &self.minmax_columns)
            .field("sorting_key", &self.sorting_key)
            .field("skip_indices", &self.skip_indices)
            .field("ttls", &self.ttls)
            .field("projections", &self.projections)
            .field("merging", &self.merging)
            .field("format_version", &self.format_version)
            .field("object_columns", &self.object_columns)
            .finish()
    }
}

impl TableMetadata {
    /// Start building a snapshot over the given physical schema.
    pub fn builder(schema: SchemaRef) -> TableMetadataBuilder {
        TableMetadataBuilder {
            schema,
            partition_key: Vec::new(),
            minmax_columns: None,
            sorting_key: Vec::new(),
            sort_key_expressions: Vec::new(),
            skip_indices: Vec::new(),
            ttls: TableTtls::default(),
            projections: Vec::new(),
            merging: MergingMode::Ordinary,
            format_version: FormatVersion::V1,
            object_columns: Vec::new(),
        }
    }

    /// Physical table schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Partition-key expressions, in declaration order.
    pub fn partition_key(&self) -> &[Arc<dyn KeyExpression>] {
        &self.partition_key
    }

    /// Whether the table is partitioned.
    pub fn has_partition_key(&self) -> bool {
        !self.partition_key.is_empty()
    }

    /// Result-column names of the partition key.
    pub fn partition_key_column_names(&self) -> Vec<String> {
        self.partition_key
            .iter()
            .map(|e| e.result_name().to_owned())
            .collect()
    }

    /// Columns tracked by the part's min/max index.
    pub fn minmax_columns(&self) -> &[String] {
        &self.minmax_columns
    }

    /// Position of the date column inside the min/max index (v0 naming).
    pub(crate) fn minmax_date_column_pos(&self) -> Result<usize, WriteError> {
        self.minmax_columns
            .iter()
            .position(|name| {
                self.schema
                    .field_with_name(name)
                    .map(|f| f.data_type() == &DataType::Date32)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                WriteError::logical("legacy format requires a date column in the min/max index")
            })
    }

    /// Sorting-key column names.
    pub fn sorting_key(&self) -> &[String] {
        &self.sorting_key
    }

    /// Whether parts of this table are sorted.
    pub fn has_sorting_key(&self) -> bool {
        !self.sorting_key.is_empty()
    }

    /// Expressions producing computed sort-key columns.
    pub fn sort_key_expressions(&self) -> &[Arc<dyn KeyExpression>] {
        &self.sort_key_expressions
    }

    /// Skip indices built alongside every part.
    pub fn skip_indices(&self) -> &[SkipIndexDescription] {
        &self.skip_indices
    }

    /// Whether the table declares skip indices.
    pub fn has_skip_indices(&self) -> bool {
        !self.skip_indices.is_empty()
    }

    /// TTL entries of every category.
    pub fn ttls(&self) -> &TableTtls {
        &self.ttls
    }

    /// Declared projections.
    pub fn projections(&self) -> &[ProjectionDescription] {
        &self.projections
    }

    /// Row-reduction mode applied on merges (and on insert when enabled).
    pub fn merging(&self) -> &MergingMode {
        &self.merging
    }

    /// On-disk naming scheme.
    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    /// Verify a block structurally matches this snapshot.
    ///
    /// Every block column must exist in the schema with an equal type;
    /// object columns are exempt from the type check since their concrete
    /// type is deduced per block. Schema columns absent from the block are
    /// allowed and simply not stored.
    pub fn check(&self, block: &RecordBatch) -> Result<(), WriteError> {
        for (field, column) in block.schema().fields().iter().zip(block.columns()) {
            let declared = self.schema.field_with_name(field.name()).map_err(|_| {
                WriteError::SchemaMismatch(format!(
                    "block column '{}' is not declared by the table",
                    field.name()
                ))
            })?;
            let is_object = self.object_columns.iter().any(|c| c == field.name());
            if !is_object && declared.data_type() != column.data_type() {
                return Err(WriteError::SchemaMismatch(format!(
                    "column '{}' has type {} but the table declares {}",
                    field.name(),
                    column.data_type(),
                    declared.data_type()
                )));
            }
        }
        Ok(())
    }

    /// The stored-columns schema for one block: declared physical columns
    /// filtered to those the block carries, with object-column types
    /// replaced by the concrete per-block types.
    pub(crate) fn columns_for_block(&self, block: &RecordBatch) -> SchemaRef {
        let mut fields: Vec<Field> = Vec::new();
        for field in self.schema.fields() {
            let Some(column) = block.column_by_name(field.name()) else {
                continue;
            };
            let is_object = self.object_columns.iter().any(|c| c == field.name());
            if is_object {
                fields.push(
                    Field::new(
                        field.name().clone(),
                        column.data_type().clone(),
                        field.is_nullable(),
                    )
                    .with_metadata(field.metadata().clone()),
                );
            } else {
                fields.push(field.as_ref().clone());
            }
        }
        Arc::new(Schema::new(fields))
    }
}

/// Builder for [`TableMetadata`].
pub struct TableMetadataBuilder {
    schema: SchemaRef,
    partition_key: Vec<Arc<dyn KeyExpression>>,
    minmax_columns: Option<Vec<String>>,
    sorting_key: Vec<String>,
    sort_key_expressions: Vec<Arc<dyn KeyExpression>>,
    skip_indices: Vec<SkipIndexDescription>,
    ttls: TableTtls,
    projections: Vec<ProjectionDescription>,
    merging: MergingMode,
    format_version: FormatVersion,
    object_columns: Vec<String>,
}

impl TableMetadataBuilder {
    /// Declare the partition key as an ordered list of expressions.
    pub fn partition_key(
        mut self,
        expressions: impl IntoIterator<Item = Arc<dyn KeyExpression>>,
    ) -> Self {
        self.partition_key = expressions.into_iter().collect();
        self
    }

    /// Override the min/max index columns (defaults to the partition-key
    /// expressions that are plain schema columns).
    pub fn minmax_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.minmax_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Declare the sorting key column names, in order.
    pub fn sorting_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sorting_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add an expression that computes a sort-key column absent from the
    /// physical schema.
    pub fn sort_key_expression(mut self, expression: Arc<dyn KeyExpression>) -> Self {
        self.sort_key_expressions.push(expression);
        self
    }

    /// Add a skip index.
    pub fn skip_index(mut self, index: SkipIndexDescription) -> Self {
        self.skip_indices.push(index);
        self
    }

    /// Set the table-wide rows TTL.
    pub fn rows_ttl(mut self, ttl: TtlDescription) -> Self {
        self.ttls.rows = Some(ttl);
        self
    }

    /// Add a `GROUP BY` TTL entry.
    pub fn group_by_ttl(mut self, ttl: TtlDescription) -> Self {
        self.ttls.group_by.push(ttl);
        self
    }

    /// Add a rows `WHERE` TTL entry.
    pub fn rows_where_ttl(mut self, ttl: TtlDescription) -> Self {
        self.ttls.rows_where.push(ttl);
        self
    }

    /// Add a per-column TTL entry.
    pub fn column_ttl(mut self, column: impl Into<String>, ttl: TtlDescription) -> Self {
        self.ttls.columns.push((column.into(), ttl));
        self
    }

    /// Add a recompression TTL entry.
    pub fn recompression_ttl(mut self, ttl: TtlDescription) -> Self {
        self.ttls.recompression.push(ttl);
        self
    }

    /// Add a move TTL entry.
    pub fn move_ttl(mut self, ttl: TtlDescription) -> Self {
        self.ttls.moves.push(ttl);
        self
    }

    /// Add a projection.
    pub fn projection(mut self, projection: ProjectionDescription) -> Self {
        self.projections.push(projection);
        self
    }

    /// Set the merging mode.
    pub fn merging(mut self, merging: MergingMode) -> Self {
        self.merging = merging;
        self
    }

    /// Set the on-disk format version.
    pub fn format_version(mut self, version: FormatVersion) -> Self {
        self.format_version = version;
        self
    }

    /// Mark a column as object-typed: its concrete type is deduced per block.
    pub fn object_column(mut self, name: impl Into<String>) -> Self {
        self.object_columns.push(name.into());
        self
    }

    /// Validate and produce the snapshot.
    pub fn build(self) -> Result<TableMetadata, WriteError> {
        let minmax_columns = match self.minmax_columns {
            Some(columns) => columns,
            None => self
                .partition_key
                .iter()
                .map(|e| e.result_name().to_owned())
                .filter(|name| self.schema.field_with_name(name).is_ok())
                .collect(),
        };
        for name in &minmax_columns {
            if self.schema.field_with_name(name).is_err() {
                return Err(WriteError::SchemaMismatch(format!(
                    "min/max index column '{name}' is not a physical column"
                )));
            }
        }

        let computed: Vec<&str> = self
            .sort_key_expressions
            .iter()
            .map(|e| e.result_name())
            .chain(self.partition_key.iter().map(|e| e.result_name()))
            .collect();
        for name in &self.sorting_key {
            if self.schema.field_with_name(name).is_err()
                && !computed.iter().any(|c| c == name)
            {
                return Err(WriteError::SchemaMismatch(format!(
                    "sorting key column '{name}' is neither physical nor computed"
                )));
            }
        }

        let metadata = TableMetadata {
            schema: self.schema,
            partition_key: self.partition_key,
            minmax_columns,
            sorting_key: self.sorting_key,
            sort_key_expressions: self.sort_key_expressions,
            skip_indices: self.skip_indices,
            ttls: self.ttls,
            projections: self.projections,
            merging: self.merging,
            format_version: self.format_version,
            object_columns: self.object_columns,
        };
        if metadata.format_version == FormatVersion::V0 {
            metadata.minmax_date_column_pos()?;
        }
        Ok(metadata)
    }
}
