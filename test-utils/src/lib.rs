//! Fixtures shared by the kernel's integration tests: generated batches, slow functions and
//! fragments, and a file format whose writers fail on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dataset_kernel::arrow::array::{Array, ArrayRef, AsArray, Int64Array, RecordBatch, StringArray};
use dataset_kernel::arrow::datatypes::{DataType, Int64Type, SchemaRef};
use dataset_kernel::arrow::util::pretty::pretty_format_batches;
use dataset_kernel::dataset::InMemoryDataset;
use dataset_kernel::expressions::{Expression, KnownFieldValues};
use dataset_kernel::format::{
    BatchStream, FileFormat, FileWriteOptions, FileWriter, IpcFileFormat, WrittenFile,
};
use dataset_kernel::fragment::{Fragment, FragmentRef};
use dataset_kernel::functions::ScalarFunction;
use dataset_kernel::object_store::memory::InMemory;
use dataset_kernel::object_store::path::Path;
use dataset_kernel::object_store::DynObjectStore;
use dataset_kernel::source::FileSource;
use dataset_kernel::{DatasetRef, DatasetResult, Error};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use itertools::Itertools;

/// Generates `num_batches` batches of `rows_per_batch` rows each. Column `i` counts up from
/// `start` across all batches, so it records the sequential order of the rows; column `bucket`
/// is `i % 4` as a string, for partitioning.
pub fn generate_sequential_batches(
    start: i64,
    num_batches: usize,
    rows_per_batch: usize,
) -> Vec<RecordBatch> {
    (0..num_batches)
        .map(|batch| {
            let first = start + (batch * rows_per_batch) as i64;
            let values: Vec<i64> = (first..first + rows_per_batch as i64).collect();
            let buckets: Vec<String> = values.iter().map(|v| (v % 4).to_string()).collect();
            RecordBatch::try_from_iter(vec![
                ("i", Arc::new(Int64Array::from(values)) as ArrayRef),
                ("bucket", Arc::new(StringArray::from(buckets)) as ArrayRef),
            ])
            .unwrap()
        })
        .collect()
}

/// The values of the Int64 column `name` across `batches`, in order.
pub fn i64_column(batches: &[RecordBatch], name: &str) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name(name)
                .map(|column| column.as_primitive::<Int64Type>().values().to_vec())
                .unwrap_or_default()
        })
        .collect()
}

/// An empty in-memory object store.
pub fn in_memory_store() -> Arc<DynObjectStore> {
    Arc::new(InMemory::new())
}

/// Formats `batches` as a table with its data rows sorted, for comparing results whose row order
/// is not deterministic.
pub fn format_sorted_batches(batches: &[RecordBatch]) -> Vec<String> {
    let formatted = match pretty_format_batches(batches) {
        Ok(formatted) => formatted.to_string(),
        Err(err) => return vec![format!("failed to format batches: {err}")],
    };
    let mut lines: Vec<String> = formatted.trim().lines().map(String::from).collect();
    // Keep the header (border, names, border) and the closing border in place
    let num_lines = lines.len();
    if num_lines > 3 {
        lines[3..num_lines - 1].sort_unstable();
    }
    lines
}

/// Compares the pretty-printed form of a set of batches against expected lines, ignoring the
/// order of the data rows.
#[macro_export]
macro_rules! assert_batches_sorted_eq {
    ($expected_lines: expr, $batches: expr) => {
        let mut expected_lines: Vec<String> = $expected_lines.iter().map(|&s| s.into()).collect();
        let num_lines = expected_lines.len();
        if num_lines > 3 {
            expected_lines[3..num_lines - 1].sort_unstable();
        }
        let actual_lines = $crate::format_sorted_batches($batches);
        assert_eq!(
            expected_lines, actual_lines,
            "\n\nexpected:\n\n{:#?}\nactual:\n\n{:#?}\n\n",
            expected_lines, actual_lines
        );
    };
}

/// A function for filters and projections that returns its argument unchanged, but takes 10ms
/// for any batch whose first value is a multiple of 16. Lets tests make the compute of some
/// batches finish after that of later batches.
#[derive(Debug, Default)]
pub struct DelayFunction {
    calls: AtomicUsize,
}

impl DelayFunction {
    pub const NAME: &'static str = "delay";

    pub fn new() -> Self {
        Self::default()
    }

    /// How many batches the function was invoked on.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ScalarFunction for DelayFunction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn return_type(&self, arg_types: &[DataType]) -> DatasetResult<DataType> {
        match arg_types {
            [DataType::Int64] => Ok(DataType::Int64),
            _ => Err(Error::validation(format!(
                "delay expects one Int64 argument, got {arg_types:?}"
            ))),
        }
    }

    fn invoke(&self, args: &[ArrayRef]) -> DatasetResult<ArrayRef> {
        let [arg] = args else {
            return Err(Error::invalid_expression("delay expects one argument"));
        };
        self.calls.fetch_add(1, Ordering::Relaxed);
        let values = arg.as_primitive::<Int64Type>();
        if !values.is_empty() && values.is_valid(0) && values.value(0) % 16 == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(arg.clone())
    }
}

/// An in-memory fragment that waits before producing its first batch.
#[derive(Debug)]
pub struct DelayedFragment {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    first_batch_delay: Duration,
    partition: Expression,
}

impl DelayedFragment {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>, first_batch_delay: Duration) -> Self {
        Self {
            schema,
            batches,
            first_batch_delay,
            partition: Expression::always_true(),
        }
    }
}

impl Fragment for DelayedFragment {
    fn type_name(&self) -> &str {
        "delayed"
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition
    }

    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>> {
        futures::future::ready(Ok(self.schema.clone())).boxed()
    }

    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        let delay = self.first_batch_delay;
        let batches = self.batches.clone();
        let stream: BatchStream = stream::once(tokio::time::sleep(delay))
            .flat_map(move |_| stream::iter(batches.clone().into_iter().map(Ok)))
            .boxed();
        futures::future::ready(Ok(stream)).boxed()
    }

    fn describe(&self) -> String {
        format!(
            "delayed fragment of {} batches ({:?} delay)",
            self.batches.len(),
            self.first_batch_delay
        )
    }
}

/// A dataset over the batches generated by [`generate_sequential_batches`], split into
/// `num_fragments` fragments of `batches_per_fragment` batches of `rows_per_batch` rows. The
/// first fragment defers its first batch by `first_fragment_delay`.
pub fn delayed_dataset(
    num_fragments: usize,
    batches_per_fragment: usize,
    rows_per_batch: usize,
    first_fragment_delay: Duration,
) -> DatasetRef {
    let batches = generate_sequential_batches(0, num_fragments * batches_per_fragment, rows_per_batch);
    let schema = batches[0].schema();
    let fragments: Vec<FragmentRef> = batches
        .into_iter()
        .chunks(batches_per_fragment)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let delay = if index == 0 {
                first_fragment_delay
            } else {
                Duration::ZERO
            };
            Arc::new(DelayedFragment::new(schema.clone(), chunk.collect(), delay)) as FragmentRef
        })
        .collect();
    Arc::new(InMemoryDataset::from_fragments(schema, fragments))
}

/// A fragment that fails as soon as it is opened.
#[derive(Debug)]
pub struct FailingFragment {
    schema: SchemaRef,
    partition: Expression,
}

impl FailingFragment {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            partition: Expression::always_true(),
        }
    }
}

impl Fragment for FailingFragment {
    fn type_name(&self) -> &str {
        "failing"
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition
    }

    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>> {
        futures::future::ready(Ok(self.schema.clone())).boxed()
    }

    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        futures::future::ready(Err(Error::generic("injected fragment failure"))).boxed()
    }

    fn describe(&self) -> String {
        "failing fragment".to_string()
    }
}

/// Wraps a fragment and counts how often its partition values are looked up, i.e. how often
/// pruning considers it.
#[derive(Debug)]
pub struct CountingFragment {
    inner: FragmentRef,
    lookups: Arc<AtomicUsize>,
}

impl CountingFragment {
    pub fn new(inner: FragmentRef, lookups: Arc<AtomicUsize>) -> Self {
        Self { inner, lookups }
    }
}

impl Fragment for CountingFragment {
    fn type_name(&self) -> &str {
        self.inner.type_name()
    }

    fn partition_expression(&self) -> &Expression {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.inner.partition_expression()
    }

    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>> {
        self.inner.read_physical_schema()
    }

    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        self.inner.clone().scan_batches()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn known_field_values(&self) -> KnownFieldValues {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.inner.known_field_values()
    }
}

/// Writes Arrow IPC files, except that every writer fails after accepting `fail_after` batches.
#[derive(Debug, Clone)]
pub struct FailingFormat {
    inner: IpcFileFormat,
    fail_after: usize,
}

impl FailingFormat {
    pub fn new(fail_after: usize) -> Self {
        Self {
            inner: IpcFileFormat,
            fail_after,
        }
    }
}

impl FileFormat for FailingFormat {
    fn type_name(&self) -> &str {
        "failing"
    }

    fn default_extension(&self) -> &str {
        self.inner.default_extension()
    }

    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<bool>> {
        self.inner.is_supported(source)
    }

    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<SchemaRef>> {
        self.inner.inspect(source)
    }

    fn scan_batches(&self, source: FileSource) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        self.inner.scan_batches(source)
    }

    fn make_writer(
        &self,
        store: Arc<DynObjectStore>,
        path: Path,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> DatasetResult<Box<dyn FileWriter>> {
        let inner = self.inner.make_writer(store, path, schema, options)?;
        Ok(Box::new(FailingWriter {
            inner,
            remaining: self.fail_after,
        }))
    }
}

struct FailingWriter {
    inner: Box<dyn FileWriter>,
    remaining: usize,
}

impl FileWriter for FailingWriter {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, DatasetResult<()>> {
        if self.remaining == 0 {
            return futures::future::ready(Err(Error::generic("injected sink failure"))).boxed();
        }
        self.remaining -= 1;
        self.inner.write(batch)
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, DatasetResult<WrittenFile>> {
        self.inner.finish()
    }
}

/// Lists the paths in `store`, sorted, as strings.
pub async fn list_paths(store: &DynObjectStore) -> DatasetResult<Vec<String>> {
    use futures::TryStreamExt;
    let objects: Vec<_> = store.list(None).try_collect().await?;
    Ok(objects
        .into_iter()
        .map(|object| object.location.to_string())
        .sorted()
        .collect())
}
