//! Expression handling based on arrow-rs compute kernels.
use std::sync::Arc;

use itertools::Itertools;
use tracing::debug;

use crate::arrow::array::{RecordBatch, RecordBatchOptions};
use crate::arrow::compute::filter_record_batch;
use crate::arrow::datatypes::SchemaRef;
use crate::error::DatasetResult;
use crate::expressions::Expression;
use crate::functions::FunctionRegistry;

pub use evaluate_expression::{evaluate_expression, evaluate_predicate};

pub mod evaluate_expression;


/// Applies a bound filter and projection to record batches. The filter uses SQL `WHERE`
/// semantics: rows for which it is false or null are dropped.
#[derive(Debug, Clone)]
pub struct BatchEvaluator {
    filter: Option<Expression>,
    projection: Option<Vec<Expression>>,
    output_schema: SchemaRef,
    registry: Arc<dyn FunctionRegistry>,
}

impl BatchEvaluator {
    /// `output_schema` describes the batches [`Self::evaluate`] returns: the projected schema if
    /// there is a projection, or the input schema otherwise.
    pub fn new(
        filter: Option<Expression>,
        projection: Option<Vec<Expression>>,
        output_schema: SchemaRef,
        registry: Arc<dyn FunctionRegistry>,
    ) -> Self {
        let filter = filter.filter(|filter| !filter.is_always_true());
        debug!(
            "Creating batch evaluator: filter={:?} projection={}",
            filter.as_ref().map(ToString::to_string),
            projection
                .as_ref()
                .map_or_else(|| "*".to_string(), |exprs| exprs.iter().join(", "))
        );
        Self {
            filter,
            projection,
            output_schema,
            registry,
        }
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    pub fn evaluate(&self, batch: RecordBatch) -> DatasetResult<RecordBatch> {
        let batch = match &self.filter {
            Some(filter) => {
                let mask = evaluate_predicate(filter, &batch, self.registry.as_ref())?;
                filter_record_batch(&batch, &mask)?
            }
            None => batch,
        };
        let Some(projection) = &self.projection else {
            return Ok(batch);
        };
        let columns: Vec<_> = projection
            .iter()
            .map(|expr| evaluate_expression(expr, &batch, self.registry.as_ref()))
            .try_collect()?;
        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        Ok(RecordBatch::try_new_with_options(
            self.output_schema.clone(),
            columns,
            &options,
        )?)
    }
}
