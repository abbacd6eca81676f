//! Fragments are the units a dataset is scanned in: one file, or one set of in-memory batches.

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::arrow::array::RecordBatch;
use crate::expressions::{Expression, KnownFieldValues};
use crate::format::{BatchStream, FileFormatRef};
use crate::schema::SchemaRef;
use crate::source::FileSource;
use crate::utils::require;
use crate::{DatasetResult, Error};

pub type FragmentRef = Arc<dyn Fragment>;

/// A scannable unit of data carrying a partition expression.
pub trait Fragment: Send + Sync + Debug {
    /// A short name, e.g. `"file"`.
    fn type_name(&self) -> &str;

    /// An expression every row of this fragment satisfies, derived from where the fragment lives
    /// in the dataset. `true` for unpartitioned data.
    fn partition_expression(&self) -> &Expression;

    /// The schema of the data as stored. Resolved at most once, then cached.
    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>>;

    /// Opens the fragment, returning its batches in storage order. Batches have the physical
    /// schema; callers present them under the dataset's schema.
    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>>;

    /// A human readable name for logs and errors, e.g. the file path.
    fn describe(&self) -> String;

    /// The field values guaranteed by [`Self::partition_expression`].
    fn known_field_values(&self) -> KnownFieldValues {
        self.partition_expression().known_field_values()
    }
}

/// A fragment backed by one file.
#[derive(Debug)]
pub struct FileFragment {
    source: FileSource,
    format: FileFormatRef,
    partition: Expression,
    physical_schema: OnceCell<SchemaRef>,
}

impl FileFragment {
    pub fn new(source: FileSource, format: FileFormatRef, partition: Expression) -> Self {
        Self {
            source,
            format,
            partition,
            physical_schema: OnceCell::new(),
        }
    }

    /// Supplies the physical schema up front, so it is never read from the file.
    pub fn with_physical_schema(mut self, schema: SchemaRef) -> Self {
        self.physical_schema = OnceCell::new_with(Some(schema));
        self
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn format(&self) -> &FileFormatRef {
        &self.format
    }
}

impl Fragment for FileFragment {
    fn type_name(&self) -> &str {
        "file"
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition
    }

    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>> {
        async move {
            let schema = self
                .physical_schema
                .get_or_try_init(|| async {
                    debug!("Inspecting physical schema of {}", self.source);
                    self.format.inspect(&self.source).await
                })
                .await?;
            Ok(schema.clone())
        }
        .boxed()
    }

    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        self.format.scan_batches(self.source.clone())
    }

    fn describe(&self) -> String {
        format!("{} file {}", self.format.type_name(), self.source)
    }
}

/// A fragment backed by record batches in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFragment {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    partition: Expression,
}

impl InMemoryFragment {
    /// Fails if a batch does not have `schema`.
    pub fn try_new(
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        partition: Expression,
    ) -> DatasetResult<Self> {
        for batch in &batches {
            require!(
                batch.schema_ref() == &schema,
                Error::validation(format!(
                    "Batch schema {} does not match fragment schema {}",
                    batch.schema(),
                    schema
                ))
            );
        }
        Ok(Self {
            schema,
            batches,
            partition,
        })
    }
}

impl Fragment for InMemoryFragment {
    fn type_name(&self) -> &str {
        "in-memory"
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition
    }

    fn read_physical_schema(&self) -> BoxFuture<'_, DatasetResult<SchemaRef>> {
        futures::future::ready(Ok(self.schema.clone())).boxed()
    }

    fn scan_batches(self: Arc<Self>) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        let batches: BatchStream = stream::iter(self.batches.clone().into_iter().map(Ok)).boxed();
        futures::future::ready(Ok(batches)).boxed()
    }

    fn describe(&self) -> String {
        let rows: usize = self.batches.iter().map(RecordBatch::num_rows).sum();
        format!("in-memory fragment of {rows} rows")
    }
}
