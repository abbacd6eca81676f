use std::sync::Arc;

use super::{prune_fragments, Dataset, DatasetRef, FragmentIterator};
use crate::arrow::array::RecordBatch;
use crate::expressions::{bind_partition, Expression};
use crate::fragment::{FragmentRef, InMemoryFragment};
use crate::schema::{check_projectable, SchemaRef};
use crate::DatasetResult;

/// A dataset of record batches held in memory, one fragment per batch.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    schema: SchemaRef,
    root_partition: Expression,
    fragments: Arc<[FragmentRef]>,
}

impl InMemoryDataset {
    /// Fails if a batch does not have `schema`.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> DatasetResult<Self> {
        let fragments = batches
            .into_iter()
            .map(|batch| -> DatasetResult<FragmentRef> {
                let fragment =
                    InMemoryFragment::try_new(schema.clone(), vec![batch], Expression::always_true())?;
                Ok(Arc::new(fragment))
            })
            .collect::<DatasetResult<_>>()?;
        Ok(Self {
            schema,
            root_partition: Expression::always_true(),
            fragments,
        })
    }

    /// Creates a dataset from fragments that already exist.
    pub fn from_fragments(schema: SchemaRef, fragments: Vec<FragmentRef>) -> Self {
        Self {
            schema,
            root_partition: Expression::always_true(),
            fragments: fragments.into(),
        }
    }

    /// Sets the root partition, casting its literals to the types of the columns they describe.
    /// Fails if a literal cannot take its column's type.
    pub fn with_partition_expression(mut self, root_partition: Expression) -> DatasetResult<Self> {
        self.root_partition = bind_partition(&root_partition, &self.schema)?;
        Ok(self)
    }
}

impl Dataset for InMemoryDataset {
    fn type_name(&self) -> &str {
        "in-memory"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn partition_expression(&self) -> &Expression {
        &self.root_partition
    }

    fn get_fragments_impl(&self, filter: Expression) -> DatasetResult<FragmentIterator> {
        Ok(prune_fragments(
            self.fragments.clone(),
            filter,
            self.root_partition.known_field_values(),
        ))
    }

    fn replace_schema(&self, schema: SchemaRef) -> DatasetResult<DatasetRef> {
        check_projectable(&self.schema, &schema)?;
        Ok(Arc::new(Self {
            schema,
            ..self.clone()
        }))
    }
}
