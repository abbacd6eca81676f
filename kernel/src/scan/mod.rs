//! Scans read the fragments of a dataset that survive a filter, and apply the filter and a
//! projection to every batch.
//!
//! Fragments are opened and batches computed concurrently, so [`Scanner::scan_batches`] yields
//! batches in completion order. Every batch is labelled with the [`SequenceNumber`] it would have
//! had under a sequential scan; consumers that need the sequential order restore it from the
//! labels (see [`Scanner::to_batches`] and the ordered mode of [`crate::write`]).

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Peekable, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::arrow::array::RecordBatch;
use crate::arrow::compute::concat_batches;
use crate::dataset::{DatasetRef, FragmentIterator};
use crate::engine::arrow_expression::BatchEvaluator;
use crate::engine::executor::tokio::{TokioBackgroundExecutor, TokioMultiThreadExecutor};
use crate::engine::executor::{spawn_with_result, TaskExecutor};
use crate::expressions::{bind_filter, bind_projection, Expression, KnownFieldValues};
use crate::format::BatchStream;
use crate::fragment::FragmentRef;
use crate::functions::{DefaultFunctionRegistry, FunctionRegistry};
use crate::schema::{project_batch, SchemaRef};
use crate::{DatasetResult, Error};

/// The position of a batch in the order a sequential scan produces.
///
/// Labels are assigned when a batch is emitted, without knowing how many batches earlier
/// fragments hold: `(fragment_index, batch_index)` orders batches, and `last_in_fragment` makes
/// the label of the following batch computable. A fragment without batches emits one empty batch
/// so that it still occupies a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceNumber {
    pub fragment_index: u64,
    pub batch_index: u64,
    pub last_in_fragment: bool,
}

impl SequenceNumber {
    pub fn new(fragment_index: u64, batch_index: u64, last_in_fragment: bool) -> Self {
        Self {
            fragment_index,
            batch_index,
            last_in_fragment,
        }
    }

    /// The label of the very first batch of a scan.
    pub const FIRST: (u64, u64) = (0, 0);

    pub fn label(&self) -> (u64, u64) {
        (self.fragment_index, self.batch_index)
    }

    /// The label of the batch a sequential scan emits next.
    pub fn successor(&self) -> (u64, u64) {
        if self.last_in_fragment {
            (self.fragment_index + 1, 0)
        } else {
            (self.fragment_index, self.batch_index + 1)
        }
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label().cmp(&other.label())
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.fragment_index, self.batch_index)?;
        if self.last_in_fragment {
            write!(f, " (last)")?;
        }
        Ok(())
    }
}

/// A batch of scan output with its sequential position and origin.
#[derive(Debug, Clone)]
pub struct SequencedBatch {
    pub batch: RecordBatch,
    pub sequence: SequenceNumber,
    pub fragment: FragmentRef,
}

pub type SequencedBatchStream = BoxStream<'static, DatasetResult<SequencedBatch>>;

/// Configures a [`Scanner`].
#[derive(Debug)]
pub struct ScannerBuilder {
    dataset: DatasetRef,
    projection: Option<(Vec<Expression>, Vec<String>)>,
    filter: Expression,
    use_threads: bool,
    batch_readahead: usize,
    fragment_readahead: usize,
    registry: Option<Arc<dyn FunctionRegistry>>,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl ScannerBuilder {
    pub const DEFAULT_BATCH_READAHEAD: usize = 16;
    pub const DEFAULT_FRAGMENT_READAHEAD: usize = 4;

    pub fn new(dataset: DatasetRef) -> Self {
        Self {
            dataset,
            projection: None,
            filter: Expression::always_true(),
            use_threads: false,
            batch_readahead: Self::DEFAULT_BATCH_READAHEAD,
            fragment_readahead: Self::DEFAULT_FRAGMENT_READAHEAD,
            registry: None,
            executor: None,
        }
    }

    /// Output one column per expression, named by the matching entry of `names`.
    pub fn project(mut self, exprs: Vec<Expression>, names: Vec<String>) -> Self {
        self.projection = Some((exprs, names));
        self
    }

    /// Output only the named columns of the dataset, in the given order.
    pub fn project_columns(self, names: &[&str]) -> Self {
        let exprs = names.iter().map(|name| Expression::column(*name)).collect();
        let names = names.iter().map(|name| name.to_string()).collect();
        self.project(exprs, names)
    }

    /// Keep only rows for which `filter` is true. Also prunes fragments.
    pub fn filter(mut self, filter: Expression) -> Self {
        self.filter = filter;
        self
    }

    /// Whether fragments are opened and batches computed concurrently. Defaults to false.
    pub fn use_threads(mut self, use_threads: bool) -> Self {
        self.use_threads = use_threads;
        self
    }

    /// How many batches are computed concurrently when using threads.
    pub fn batch_readahead(mut self, batch_readahead: usize) -> Self {
        self.batch_readahead = batch_readahead.max(1);
        self
    }

    /// How many fragments are read concurrently when using threads.
    pub fn fragment_readahead(mut self, fragment_readahead: usize) -> Self {
        self.fragment_readahead = fragment_readahead.max(1);
        self
    }

    /// Resolves calls in the filter and projection. Defaults to [`DefaultFunctionRegistry`].
    pub fn with_function_registry(mut self, registry: Arc<dyn FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Runs the scan's tasks. Defaults to the current tokio runtime, or a background runtime if
    /// there is none.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Binds the filter and projection against the dataset schema.
    pub fn finish(self) -> DatasetResult<Scanner> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(DefaultFunctionRegistry::new()));
        let dataset_schema = self.dataset.schema().clone();
        let filter = bind_filter(&self.filter, &dataset_schema, registry.as_ref())?;
        let (projection, output_schema) = match self.projection {
            Some((exprs, names)) => {
                let (exprs, schema) =
                    bind_projection(&exprs, &names, &dataset_schema, registry.as_ref())?;
                (Some(exprs), schema)
            }
            None => (None, dataset_schema),
        };
        let executor = match (self.use_threads, self.executor) {
            (false, _) => None,
            (true, Some(executor)) => Some(executor),
            (true, None) => Some(default_executor()),
        };
        let evaluator = BatchEvaluator::new(
            Some(filter.clone()),
            projection,
            output_schema,
            registry.clone(),
        );
        Ok(Scanner {
            dataset: self.dataset,
            filter,
            evaluator: Arc::new(evaluator),
            registry,
            executor,
            batch_readahead: self.batch_readahead,
            fragment_readahead: self.fragment_readahead,
        })
    }
}

pub(crate) fn default_executor() -> Arc<dyn TaskExecutor> {
    match TokioMultiThreadExecutor::current() {
        Ok(executor) => Arc::new(executor),
        Err(_) => {
            debug!("No tokio runtime, scanning on a background executor");
            Arc::new(TokioBackgroundExecutor::new())
        }
    }
}

/// A configured scan of a dataset. Scanning can be repeated; each scan prunes afresh.
#[derive(Debug, Clone)]
pub struct Scanner {
    dataset: DatasetRef,
    filter: Expression,
    evaluator: Arc<BatchEvaluator>,
    registry: Arc<dyn FunctionRegistry>,
    executor: Option<Arc<dyn TaskExecutor>>,
    batch_readahead: usize,
    fragment_readahead: usize,
}

impl Scanner {
    /// The schema of the scanned batches.
    pub fn schema(&self) -> &SchemaRef {
        self.evaluator.output_schema()
    }

    pub fn dataset_schema(&self) -> &SchemaRef {
        self.dataset.schema()
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    /// The bound filter.
    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    /// The executor that runs the scan's tasks, if it uses threads.
    pub fn executor(&self) -> Option<&Arc<dyn TaskExecutor>> {
        self.executor.as_ref()
    }

    /// The fragments this scan reads.
    pub fn get_fragments(&self) -> DatasetResult<FragmentIterator> {
        self.dataset
            .get_fragments_with_registry(&self.filter, self.registry.as_ref())
    }

    /// Scans the dataset. Batches arrive in completion order, labelled with their sequential
    /// position. A failure to read any fragment ends the stream with an [`Error::Scan`];
    /// dropping the stream stops all outstanding work.
    pub fn scan_batches(&self) -> DatasetResult<SequencedBatchStream> {
        self.scan_batches_admitted(None)
    }

    /// Like [`Self::scan_batches`], but fragment `i` is not opened until `admission` holds a
    /// limit above `i`. Fragments already open keep producing batches while later ones wait.
    pub(crate) fn scan_batches_admitted(
        &self,
        admission: Option<watch::Receiver<u64>>,
    ) -> DatasetResult<SequencedBatchStream> {
        let fragments = self.get_fragments()?;
        let root_known = self.dataset.partition_expression().known_field_values();
        let dataset_schema = self.dataset.schema().clone();
        let executor = self.executor.clone();
        let labelled = {
            let executor = executor.clone();
            let dataset_schema = dataset_schema.clone();
            stream::iter(fragments.enumerate()).then(move |(index, fragment)| {
                let index = index as u64;
                let executor = executor.clone();
                let dataset_schema = dataset_schema.clone();
                let mut admission = admission.clone();
                async move {
                    if let Some(admission) = &mut admission {
                        if *admission.borrow() <= index {
                            trace!("Fragment {index} waits for admission");
                        }
                        // Fails only once the limit can no longer change, then nothing waits
                        let _ = admission.wait_for(|limit| index < *limit).await;
                    }
                    label_fragment(index, fragment, dataset_schema, executor)
                }
            })
        };
        let evaluator = self.evaluator.clone();
        let compute = move |item: DatasetResult<(SequenceNumber, FragmentRef, RecordBatch)>| {
            let evaluator = evaluator.clone();
            let dataset_schema = dataset_schema.clone();
            let executor = executor.clone();
            let root_known = root_known.clone();
            async move {
                let (sequence, fragment, batch) = item?;
                let mut known = root_known;
                fragment
                    .partition_expression()
                    .insert_known_field_values(&mut known);
                let describe = fragment.describe();
                let work = move || evaluate_batch(&batch, &dataset_schema, &known, &evaluator);
                let batch = match executor {
                    Some(executor) => {
                        spawn_with_result(executor.as_ref(), async move { work() }).await?
                    }
                    None => work(),
                }
                .map_err(|err| Error::scan(describe, err))?;
                Ok(SequencedBatch {
                    batch,
                    sequence,
                    fragment,
                })
            }
        };
        let stream = if self.executor.is_some() {
            info!(
                "Scanning {} dataset with fragment readahead {} and batch readahead {}",
                self.dataset.type_name(),
                self.fragment_readahead,
                self.batch_readahead
            );
            labelled
                .flatten_unordered(self.fragment_readahead)
                .map(compute)
                .buffer_unordered(self.batch_readahead)
                .boxed()
        } else {
            info!("Scanning {} dataset sequentially", self.dataset.type_name());
            labelled.flatten().then(compute).boxed()
        };
        Ok(stream)
    }

    /// Scans the dataset, returning the batches in sequential order.
    pub async fn to_batches(&self) -> DatasetResult<Vec<RecordBatch>> {
        let mut batches: Vec<_> = self.scan_batches()?.try_collect().await?;
        batches.sort_by_key(|batch| batch.sequence);
        Ok(batches.into_iter().map(|batch| batch.batch).collect())
    }

    /// Scans the dataset into a single batch, in sequential order.
    pub async fn to_table(&self) -> DatasetResult<RecordBatch> {
        let batches = self.to_batches().await?;
        Ok(concat_batches(self.schema(), &batches)?)
    }

    /// Counts the rows that survive the filter.
    pub async fn count_rows(&self) -> DatasetResult<usize> {
        self.scan_batches()?
            .try_fold(0, |count, batch| future::ok(count + batch.batch.num_rows()))
            .await
    }
}

fn evaluate_batch(
    batch: &RecordBatch,
    dataset_schema: &SchemaRef,
    known: &KnownFieldValues,
    evaluator: &BatchEvaluator,
) -> DatasetResult<RecordBatch> {
    let batch = project_batch(batch, dataset_schema, known)?;
    evaluator.evaluate(batch)
}

type LabelledBatch = (SequenceNumber, FragmentRef, RecordBatch);

enum FragmentState {
    Unopened(Option<Arc<dyn TaskExecutor>>),
    Open(Peekable<BatchStream>, u64),
    Done,
}

// Opens `fragment` and labels its batches. Looks one batch ahead to know which is the last.
fn label_fragment(
    index: u64,
    fragment: FragmentRef,
    dataset_schema: SchemaRef,
    executor: Option<Arc<dyn TaskExecutor>>,
) -> BoxStream<'static, DatasetResult<LabelledBatch>> {
    let state = FragmentState::Unopened(executor);
    stream::unfold(state, move |state| {
        let fragment = fragment.clone();
        let dataset_schema = dataset_schema.clone();
        async move {
            let (mut batches, batch_index) = match state {
                FragmentState::Done => return None,
                FragmentState::Open(batches, batch_index) => (batches, batch_index),
                FragmentState::Unopened(executor) => {
                    match open_fragment(fragment.clone(), executor).await {
                        Ok(batches) => (batches.peekable(), 0),
                        Err(err) => {
                            let err = Error::scan(fragment.describe(), err);
                            return Some((Err(err), FragmentState::Done));
                        }
                    }
                }
            };
            match batches.next().await {
                None => {
                    // Only reached for a fragment without batches; otherwise the lookahead below
                    // has already marked the last batch.
                    debug!("{} has no batches", fragment.describe());
                    let sequence = SequenceNumber::new(index, batch_index, true);
                    let batch = RecordBatch::new_empty(dataset_schema);
                    Some((Ok((sequence, fragment, batch)), FragmentState::Done))
                }
                Some(Err(err)) => {
                    let err = Error::scan(fragment.describe(), err);
                    Some((Err(err), FragmentState::Done))
                }
                Some(Ok(batch)) => {
                    let last = Pin::new(&mut batches).peek().await.is_none();
                    let sequence = SequenceNumber::new(index, batch_index, last);
                    let next = if last {
                        debug!("Finished scanning {}", fragment.describe());
                        FragmentState::Done
                    } else {
                        FragmentState::Open(batches, batch_index + 1)
                    };
                    Some((Ok((sequence, fragment, batch)), next))
                }
            }
        }
    })
    .boxed()
}

fn open_fragment(
    fragment: FragmentRef,
    executor: Option<Arc<dyn TaskExecutor>>,
) -> BoxFuture<'static, DatasetResult<BatchStream>> {
    debug!("Opening {}", fragment.describe());
    match executor {
        Some(executor) => {
            let handle = spawn_with_result(executor.as_ref(), fragment.scan_batches());
            async move { handle.await? }.boxed()
        }
        None => fragment.scan_batches(),
    }
}
