//! Writing scan output to partitioned files.
//!
//! Every batch is split by the values of its partition columns. Each distinct partition directory
//! gets its own sink task, fed through a bounded channel, that encodes the rows it receives into
//! one or more files. Partition columns are encoded in the directory names and dropped from the
//! files themselves.
//!
//! Batches arrive in the order the scan completes them. Unless order preservation is requested
//! they are written in that order. With [`WriteOptions::with_preserve_order`], the rows each
//! sink receives are in the order a sequential scan would have produced.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use object_store::path::Path;
use object_store::DynObjectStore;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::arrow::array::{RecordBatch, UInt32Array};
use crate::arrow::compute::take_record_batch;
use crate::arrow::datatypes::Schema;
use crate::engine::executor::{spawn_with_result, TaskExecutor, TaskHandle};
use crate::expressions::Scalar;
use crate::format::{FileFormatRef, FileWriteOptions, FileWriter, WrittenFile};
use crate::partition::PartitioningRef;
use crate::scan::{default_executor, Scanner, SequenceNumber};
use crate::schema::SchemaRef;
use crate::utils::{render_basename, require};
use crate::{DatasetResult, Error};

use self::reorder::ReorderBuffer;

mod reorder;

/// The placeholder every basename template must contain.
pub const BASENAME_PLACEHOLDER: &str = "{i}";

/// Batches queued per sink before the writer waits for the sink to catch up.
const SINK_QUEUE_DEPTH: usize = 16;

/// Where and how a write produces its files.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    store: Arc<DynObjectStore>,
    format: FileFormatRef,
    base_dir: Path,
    partitioning: Option<PartitioningRef>,
    basename_template: String,
    preserve_order: bool,
    file_write_options: FileWriteOptions,
    max_partitions: usize,
    max_rows_per_file: Option<usize>,
    max_pending: usize,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl WriteOptions {
    pub const DEFAULT_MAX_PARTITIONS: usize = 1024;
    pub const DEFAULT_MAX_PENDING: usize = 256;

    /// Options that write `format` files directly into `base_dir`, named `part-{i}` with the
    /// format's extension.
    pub fn new(store: Arc<DynObjectStore>, format: FileFormatRef, base_dir: impl Into<Path>) -> Self {
        let basename_template = format!("part-{BASENAME_PLACEHOLDER}.{}", format.default_extension());
        let file_write_options = format.default_write_options();
        Self {
            store,
            format,
            base_dir: base_dir.into(),
            partitioning: None,
            basename_template,
            preserve_order: false,
            file_write_options,
            max_partitions: Self::DEFAULT_MAX_PARTITIONS,
            max_rows_per_file: None,
            max_pending: Self::DEFAULT_MAX_PENDING,
            executor: None,
        }
    }

    /// Splits rows into directories by the fields of `partitioning`.
    pub fn with_partitioning(mut self, partitioning: PartitioningRef) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    /// Names files by replacing `{i}` in `template` with a counter that starts at zero in every
    /// directory.
    pub fn with_basename_template(mut self, template: impl Into<String>) -> Self {
        self.basename_template = template.into();
        self
    }

    /// Whether the rows of every file follow the sequential order of the input. Defaults to
    /// false.
    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn with_file_write_options(mut self, options: FileWriteOptions) -> Self {
        self.file_write_options = options;
        self
    }

    /// The most partitions a single batch may be split into.
    pub fn with_max_partitions(mut self, max_partitions: usize) -> Self {
        self.max_partitions = max_partitions;
        self
    }

    /// Starts a new file once a file holds this many rows.
    pub fn with_max_rows_per_file(mut self, max_rows_per_file: usize) -> Self {
        self.max_rows_per_file = Some(max_rows_per_file);
        self
    }

    /// When preserving order, stop opening further fragments of a scan while this many row
    /// groups wait for an earlier batch. Fragments already open still deliver their batches, so
    /// the wait can briefly exceed the limit by what they hold.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Runs the sink tasks. Defaults to the scan's executor, or the current tokio runtime.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn format(&self) -> &FileFormatRef {
        &self.format
    }

    pub fn partitioning(&self) -> Option<&PartitioningRef> {
        self.partitioning.as_ref()
    }

    pub fn preserve_order(&self) -> bool {
        self.preserve_order
    }

    pub fn basename_template(&self) -> &str {
        &self.basename_template
    }

    fn validate(&self) -> DatasetResult<()> {
        require!(
            self.basename_template.contains(BASENAME_PLACEHOLDER),
            Error::validation(format!(
                "Basename template '{}' does not contain {BASENAME_PLACEHOLDER}",
                self.basename_template
            ))
        );
        require!(
            !self.basename_template.contains('/'),
            Error::validation(format!(
                "Basename template '{}' must not contain a directory",
                self.basename_template
            ))
        );
        require!(
            self.max_partitions > 0,
            Error::validation("max_partitions must be positive")
        );
        require!(
            self.max_rows_per_file != Some(0),
            Error::validation("max_rows_per_file must be positive")
        );
        require!(
            self.max_pending > 0,
            Error::validation("max_pending must be positive")
        );
        Ok(())
    }
}

/// Writes every batch of `scanner` according to `options`. Any error aborts the whole write;
/// files finished before the error remain in the store.
pub async fn write_dataset(
    options: WriteOptions,
    scanner: &Scanner,
) -> DatasetResult<Vec<WrittenFile>> {
    let mut options = options;
    if options.executor.is_none() {
        options.executor = scanner.executor().cloned();
    }
    let mut writer = DatasetWriter::try_new(options, scanner.schema().clone())?;
    writer.write_scan(scanner).await?;
    writer.finish().await
}

/// Writes a stream of batches of `schema`. The stream's order is its sequential order.
pub async fn write_stream(
    options: WriteOptions,
    schema: SchemaRef,
    mut batches: BoxStream<'_, DatasetResult<RecordBatch>>,
) -> DatasetResult<Vec<WrittenFile>> {
    let mut writer = DatasetWriter::try_new(options, schema)?;
    let mut index = 0;
    while let Some(batch) = batches.next().await {
        writer.write(SequenceNumber::new(0, index, false), batch?).await?;
        index += 1;
    }
    writer.finish().await
}

/// Writes the batches of `scanner` like [`write_dataset`], and also returns them to the caller
/// as they are written, in arrival order. The write completes when the returned stream is
/// exhausted; the stream ends with the error of a failed write. Dropping the stream early aborts
/// the write.
pub fn tee(
    options: WriteOptions,
    scanner: &Scanner,
) -> DatasetResult<BoxStream<'static, DatasetResult<RecordBatch>>> {
    let mut options = options;
    if options.executor.is_none() {
        options.executor = scanner.executor().cloned();
    }
    let writer = DatasetWriter::try_new(options, scanner.schema().clone())?;
    let batches = scanner.scan_batches_admitted(writer.admission())?;
    let tee = stream::unfold(Some((batches, writer)), |state| async move {
        let (mut batches, mut writer) = state?;
        match batches.next().await {
            Some(Ok(batch)) => match writer.write(batch.sequence, batch.batch.clone()).await {
                Ok(()) => Some((Ok(batch.batch), Some((batches, writer)))),
                Err(err) => Some((Err(err), None)),
            },
            Some(Err(err)) => Some((Err(err), None)),
            None => match writer.finish().await {
                Ok(files) => {
                    debug!("Tee finished writing {} files", files.len());
                    None
                }
                Err(err) => Some((Err(err), None)),
            },
        }
    });
    Ok(tee.boxed())
}

/// Routes the rows of incoming batches to one sink per partition directory.
///
/// Dropping a writer before [`Self::finish`] aborts its sinks.
#[derive(Debug)]
pub struct DatasetWriter {
    options: WriteOptions,
    schema: SchemaRef,
    file_schema: SchemaRef,
    partition_columns: Vec<usize>,
    outputs: IndexMap<String, OutputSink>,
    reorder: Option<ReorderBuffer<RecordBatch>>,
    // The number of fragments a scan may open while the reorder buffer is full
    admission: watch::Sender<u64>,
    peak_pending: usize,
    executor: Arc<dyn TaskExecutor>,
}

#[derive(Debug)]
struct OutputSink {
    dir: Path,
    sender: mpsc::Sender<RecordBatch>,
    handle: TaskHandle<DatasetResult<Vec<WrittenFile>>>,
}

impl DatasetWriter {
    /// A writer for batches of `schema`. Fails if the options are invalid or `schema` lacks a
    /// partition field.
    pub fn try_new(options: WriteOptions, schema: SchemaRef) -> DatasetResult<Self> {
        options.validate()?;
        let mut partition_columns = vec![];
        if let Some(partitioning) = &options.partitioning {
            for field in partitioning.schema().fields() {
                let (index, column) = schema.column_with_name(field.name()).ok_or_else(|| {
                    Error::missing_column(format!(
                        "Partition field {} is not in the written schema",
                        field.name()
                    ))
                })?;
                require!(
                    column.data_type() == field.data_type(),
                    Error::validation(format!(
                        "Partition field {} has type {} but the written column has type {}",
                        field.name(),
                        field.data_type(),
                        column.data_type()
                    ))
                );
                partition_columns.push(index);
            }
        }
        let file_fields: Vec<_> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| !partition_columns.contains(i))
            .map(|(_, field)| field.clone())
            .collect();
        let file_schema = Arc::new(Schema::new_with_metadata(
            file_fields,
            schema.metadata().clone(),
        ));
        let executor = options.executor.clone().unwrap_or_else(default_executor);
        let reorder = options.preserve_order.then(ReorderBuffer::new);
        info!(
            "Writing {} files to {} (preserve order: {})",
            options.format.type_name(),
            options.base_dir,
            options.preserve_order
        );
        Ok(Self {
            options,
            schema,
            file_schema,
            partition_columns,
            outputs: IndexMap::new(),
            reorder,
            admission: watch::Sender::new(u64::MAX),
            peak_pending: 0,
            executor,
        })
    }

    /// The schema of the files, i.e. the input schema without partition columns.
    pub fn file_schema(&self) -> &SchemaRef {
        &self.file_schema
    }

    /// The most row groups that were held at once waiting for an earlier batch.
    pub fn peak_pending(&self) -> usize {
        self.peak_pending
    }

    /// Writes every batch of `scanner`. When preserving order, the scan opens no further
    /// fragments while the held row groups reach [`WriteOptions::with_max_pending`].
    pub async fn write_scan(&mut self, scanner: &Scanner) -> DatasetResult<()> {
        let mut batches = scanner.scan_batches_admitted(self.admission())?;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            self.write(batch.sequence, batch.batch).await?;
        }
        Ok(())
    }

    fn admission(&self) -> Option<watch::Receiver<u64>> {
        self.reorder.as_ref().map(|_| self.admission.subscribe())
    }

    /// Routes the rows of the batch labelled `sequence` to their sinks.
    pub async fn write(&mut self, sequence: SequenceNumber, batch: RecordBatch) -> DatasetResult<()> {
        require!(
            batch.schema_ref().fields() == self.schema.fields(),
            Error::validation(format!(
                "Batch {sequence} does not have the schema of the write: {:?}",
                batch.schema()
            ))
        );
        let groups = self.split(&batch)?;
        let mut routed = Vec::with_capacity(groups.len());
        for (dir, rows) in groups {
            routed.push((self.output_index(dir)?, rows));
        }
        let released = match &mut self.reorder {
            Some(reorder) => {
                let released = reorder.push(sequence, routed);
                let pending = reorder.num_pending();
                if pending > 0 {
                    debug!(
                        "Batch {sequence} arrived; {pending} groups held until {:?} arrives",
                        reorder.next_expected()
                    );
                }
                self.peak_pending = self.peak_pending.max(pending);
                // The awaited fragment is always admitted, so the scan can always catch up
                let limit = if pending < self.options.max_pending {
                    u64::MAX
                } else {
                    reorder.next_expected().0 + 1
                };
                self.admission.send_if_modified(|current| {
                    if *current == limit {
                        return false;
                    }
                    if limit != u64::MAX {
                        debug!("{pending} groups held; opening no fragment after {}", limit - 1);
                    }
                    *current = limit;
                    true
                });
                released
            }
            None => routed,
        };
        for (output, rows) in released {
            self.send(output, rows).await?;
        }
        Ok(())
    }

    /// Flushes everything, closes all files and returns them, ordered by directory and then by
    /// file counter.
    pub async fn finish(mut self) -> DatasetResult<Vec<WrittenFile>> {
        if let Some(mut reorder) = self.reorder.take() {
            let remaining = reorder.drain();
            if !remaining.is_empty() {
                warn!(
                    "Input ended with {} groups waiting for earlier batches",
                    remaining.len()
                );
            }
            for (output, rows) in remaining {
                self.send(output, rows).await?;
            }
        }
        let mut written = vec![];
        for (_, output) in std::mem::take(&mut self.outputs) {
            let OutputSink {
                dir,
                sender,
                handle,
            } = output;
            drop(sender);
            let files = handle.await?.map_err(|err| sink_error(&dir, err))?;
            written.extend(files);
        }
        written.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            "Wrote {} files (at most {} groups held for ordering)",
            written.len(),
            self.peak_pending
        );
        Ok(written)
    }

    // Splits `batch` by partition directory, in order of first appearance. Partition columns are
    // dropped.
    fn split(&self, batch: &RecordBatch) -> DatasetResult<Vec<(String, RecordBatch)>> {
        let file_batch = batch.project(
            &(0..batch.num_columns())
                .filter(|i| !self.partition_columns.contains(i))
                .collect::<Vec<_>>(),
        )?;
        let file_batch = file_batch.with_schema(self.file_schema.clone())?;
        let Some(partitioning) = &self.options.partitioning else {
            return Ok(if batch.num_rows() > 0 {
                vec![(String::new(), file_batch)]
            } else {
                vec![]
            });
        };
        let mut rows: IndexMap<String, Vec<u32>> = IndexMap::new();
        for row in 0..batch.num_rows() {
            let values = self
                .partition_columns
                .iter()
                .map(|column| Scalar::try_from_array(batch.column(*column).as_ref(), row))
                .collect::<DatasetResult<Vec<_>>>()?;
            let dir = partitioning.format_path(&values)?;
            rows.entry(dir).or_default().push(row as u32);
        }
        require!(
            rows.len() <= self.options.max_partitions,
            Error::validation(format!(
                "A batch was split into {} partitions, more than the maximum of {}",
                rows.len(),
                self.options.max_partitions
            ))
        );
        if rows.len() == 1 {
            return Ok(rows.into_keys().map(|dir| (dir, file_batch.clone())).collect());
        }
        rows.into_iter()
            .map(|(dir, rows)| {
                let indices = UInt32Array::from(rows);
                Ok((dir, take_record_batch(&file_batch, &indices)?))
            })
            .collect()
    }

    // The index of the sink for `dir`, starting the sink if this is the first row for it.
    fn output_index(&mut self, dir: String) -> DatasetResult<usize> {
        if let Some(index) = self.outputs.get_index_of(&dir) {
            return Ok(index);
        }
        // Segments are already escaped by the partitioning, so they must not be escaped again
        let path = match dir.as_str() {
            "" => self.options.base_dir.clone(),
            dir => Path::parse(format!("{}/{dir}", self.options.base_dir))?,
        };
        let (sender, receiver) = mpsc::channel(SINK_QUEUE_DEPTH);
        let sink = Sink {
            store: self.options.store.clone(),
            format: self.options.format.clone(),
            dir: path.clone(),
            schema: self.file_schema.clone(),
            basename_template: self.options.basename_template.clone(),
            file_write_options: self.options.file_write_options.clone(),
            max_rows_per_file: self.options.max_rows_per_file,
        };
        debug!("Starting sink for {path}");
        let handle = spawn_with_result(self.executor.as_ref(), sink.run(receiver));
        let (index, _) = self.outputs.insert_full(
            dir,
            OutputSink {
                dir: path,
                sender,
                handle,
            },
        );
        Ok(index)
    }

    async fn send(&mut self, output: usize, rows: RecordBatch) -> DatasetResult<()> {
        let Some((_, sink)) = self.outputs.get_index(output) else {
            return Err(Error::generic(format!("No sink with index {output}")));
        };
        if sink.sender.send(rows).await.is_ok() {
            return Ok(());
        }
        // The sink stopped receiving, which it only does when it failed
        let Some((_, sink)) = self.outputs.swap_remove_index(output) else {
            return Err(Error::generic(format!("No sink with index {output}")));
        };
        warn!("Sink for {} stopped; aborting the write", sink.dir);
        let err = match sink.handle.await {
            Ok(Err(err)) => err,
            Ok(Ok(_)) => Error::generic("sink stopped before its input ended"),
            Err(err) => err,
        };
        Err(sink_error(&sink.dir, err))
    }
}

fn sink_error(dir: &Path, err: Error) -> Error {
    match err {
        err @ Error::Write { .. } => err,
        err => Error::write(dir, err),
    }
}

// Writes everything it receives below `dir`, starting a new file whenever the current one is
// full.
struct Sink {
    store: Arc<DynObjectStore>,
    format: FileFormatRef,
    dir: Path,
    schema: SchemaRef,
    basename_template: String,
    file_write_options: FileWriteOptions,
    max_rows_per_file: Option<usize>,
}

struct OpenFile {
    writer: Box<dyn FileWriter>,
    num_rows: usize,
}

impl Sink {
    fn run(
        self,
        mut receiver: mpsc::Receiver<RecordBatch>,
    ) -> BoxFuture<'static, DatasetResult<Vec<WrittenFile>>> {
        async move {
            let mut written = vec![];
            let mut file: Option<OpenFile> = None;
            let mut file_index = 0;
            while let Some(mut batch) = receiver.recv().await {
                while batch.num_rows() > 0 {
                    let mut open = match file.take() {
                        Some(open) => open,
                        None => {
                            let open = self.open(file_index)?;
                            file_index += 1;
                            open
                        }
                    };
                    let room = self
                        .max_rows_per_file
                        .map_or(usize::MAX, |max| max - open.num_rows);
                    let chunk_len = room.min(batch.num_rows());
                    let chunk = batch.slice(0, chunk_len);
                    batch = batch.slice(chunk_len, batch.num_rows() - chunk_len);
                    let path = open.writer.path().clone();
                    open.writer
                        .write(&chunk)
                        .await
                        .map_err(|err| Error::write(&path, err))?;
                    open.num_rows += chunk_len;
                    if Some(open.num_rows) == self.max_rows_per_file {
                        written.push(Self::close(open).await?);
                    } else {
                        file = Some(open);
                    }
                }
            }
            if let Some(open) = file {
                written.push(Self::close(open).await?);
            }
            Ok(written)
        }
        .boxed()
    }

    fn open(&self, file_index: usize) -> DatasetResult<OpenFile> {
        let path = self
            .dir
            .child(render_basename(&self.basename_template, file_index));
        debug!("Opening {path}");
        let writer = self
            .format
            .make_writer(
                self.store.clone(),
                path.clone(),
                self.schema.clone(),
                &self.file_write_options,
            )
            .map_err(|err| Error::write(&path, err))?;
        Ok(OpenFile {
            writer,
            num_rows: 0,
        })
    }

    async fn close(open: OpenFile) -> DatasetResult<WrittenFile> {
        let path = open.writer.path().clone();
        let file = open
            .writer
            .finish()
            .await
            .map_err(|err| Error::write(&path, err))?;
        debug!("Closed {} with {} rows", file.path, file.num_rows);
        Ok(file)
    }
}

