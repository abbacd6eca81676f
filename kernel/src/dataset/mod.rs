//! Datasets: collections of fragments sharing one logical schema.
//!
//! The central operation is [`Dataset::get_fragments`], which returns the fragments that may hold
//! rows matching a filter. Pruning never reads fragment contents; it only evaluates the filter
//! against the field values that partition expressions guarantee.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::info;

use crate::expressions::{bind_filter, Expression, KnownFieldValues};
use crate::fragment::FragmentRef;
use crate::functions::{DefaultFunctionRegistry, FunctionRegistry};
use crate::predicates::TruthEvaluator;
use crate::schema::SchemaRef;
use crate::DatasetResult;

pub use factory::{FileSystemDatasetFactory, FileSystemFactoryOptions};
pub use file_system::FileSystemDataset;
pub use in_memory::InMemoryDataset;

mod factory;
mod file_system;
mod in_memory;

pub type DatasetRef = Arc<dyn Dataset>;

/// A lazy sequence of fragments. Each call to [`Dataset::get_fragments`] prunes afresh.
pub type FragmentIterator = Box<dyn Iterator<Item = FragmentRef> + Send>;

/// An ordered collection of fragments under one logical schema, with a root partition
/// expression that every fragment satisfies.
pub trait Dataset: Send + Sync + Debug {
    /// A short name, e.g. `"filesystem"`.
    fn type_name(&self) -> &str;

    /// The logical schema. Every fragment's physical schema can be projected onto it.
    fn schema(&self) -> &SchemaRef;

    /// The root partition: an expression that holds for every row of the dataset.
    fn partition_expression(&self) -> &Expression;

    /// The fragments that may satisfy the bound `filter`. Called by [`Self::get_fragments`] after
    /// the root partition has been checked.
    fn get_fragments_impl(&self, filter: Expression) -> DatasetResult<FragmentIterator>;

    /// A dataset with the same fragments under `schema`. Fails unless every field the schemas
    /// share keeps its type without tightening nullability, and every field new in `schema` is
    /// nullable. The original dataset is not changed.
    fn replace_schema(&self, schema: SchemaRef) -> DatasetResult<DatasetRef>;

    /// The fragments that may hold rows satisfying `filter`, in dataset order. Fails if the filter
    /// does not type check against [`Self::schema`].
    fn get_fragments(&self, filter: &Expression) -> DatasetResult<FragmentIterator> {
        self.get_fragments_with_registry(filter, &DefaultFunctionRegistry::new())
    }

    /// Like [`Self::get_fragments`], resolving function calls in `filter` through `registry`.
    fn get_fragments_with_registry(
        &self,
        filter: &Expression,
        registry: &dyn FunctionRegistry,
    ) -> DatasetResult<FragmentIterator> {
        let filter = bind_filter(filter, self.schema(), registry)?;
        if self.partition_expression().implies(&filter) == Some(false) {
            info!(
                "Root partition {} excludes filter {filter}",
                self.partition_expression()
            );
            return Ok(Box::new(std::iter::empty()));
        }
        self.get_fragments_impl(filter)
    }
}

/// Lazily drops the fragments whose partition expression, together with the root partition's
/// bindings in `root`, rules out `filter`.
pub(crate) fn prune_fragments(
    fragments: Arc<[FragmentRef]>,
    filter: Expression,
    root: KnownFieldValues,
) -> FragmentIterator {
    if filter.is_always_true() {
        return Box::new((0..fragments.len()).map(move |i| fragments[i].clone()));
    }
    Box::new((0..fragments.len()).filter_map(move |i| {
        let fragment = &fragments[i];
        let known = fragment.known_field_values();
        let evaluator = TruthEvaluator::from((&known, &root));
        (evaluator.eval_sql_where(&filter) != Some(false)).then(|| fragment.clone())
    }))
}
