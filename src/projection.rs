//! Projections: precomputed auxiliary views stored inside the parent part.

use std::sync::Arc;

use arrow_array::RecordBatch;

use crate::{error::WriteError, metadata::TableMetadata};

/// Kind of a projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionKind {
    /// Re-sorted (and possibly filtered) copy of the parent rows.
    Normal,
    /// Pre-aggregated view; its parts always reduce with the aggregating
    /// mode, whatever the parent table uses.
    Aggregate,
}

/// Computes a projection block from the parent block.
///
/// Stands in for the query executor that evaluates the projection's
/// definition; the writer only consumes the resulting block.
pub trait ProjectionTransform: Send + Sync {
    /// Evaluate the projection over an already-reduced parent block.
    fn calculate(&self, block: &RecordBatch) -> Result<RecordBatch, WriteError>;
}

impl<F> ProjectionTransform for F
where
    F: Fn(&RecordBatch) -> Result<RecordBatch, WriteError> + Send + Sync,
{
    fn calculate(&self, block: &RecordBatch) -> Result<RecordBatch, WriteError> {
        self(block)
    }
}

/// One projection declared by the table.
#[derive(Clone)]
pub struct ProjectionDescription {
    /// Projection name; also the sub-directory stem.
    pub name: String,
    /// Normal or aggregate.
    pub kind: ProjectionKind,
    /// Child metadata: the projection's own schema and sorting key.
    pub metadata: Arc<TableMetadata>,
    /// Evaluates the projection against a parent block.
    pub transform: Arc<dyn ProjectionTransform>,
}

impl std::fmt::Debug for ProjectionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionDescription")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ProjectionDescription {
    /// Declare a projection.
    pub fn new(
        name: impl Into<String>,
        kind: ProjectionKind,
        metadata: Arc<TableMetadata>,
        transform: Arc<dyn ProjectionTransform>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            metadata,
            transform,
        }
    }
}
