//! File formats: how fragments are decoded into record batches and how written partitions are
//! encoded.
//!
//! A [`FileFormat`] is a collaborator of the dataset. The kernel only relies on the operations of
//! this trait, so a format for another file type can be plugged in without touching datasets,
//! scans or writes.

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use object_store::path::Path;
use object_store::DynObjectStore;

use crate::arrow::array::RecordBatch;
use crate::schema::SchemaRef;
use crate::source::{Compression, FileSource};
use crate::DatasetResult;

pub use self::ipc::IpcFileFormat;
pub use self::parquet::ParquetFileFormat;

mod ipc;
mod parquet;

pub type FileFormatRef = Arc<dyn FileFormat>;

/// A stream of the record batches of one file, in file order.
pub type BatchStream = BoxStream<'static, DatasetResult<RecordBatch>>;

/// Format-specific knobs for writing files. Each format documents which codecs it accepts and
/// rejects the others when a writer is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWriteOptions {
    /// Codec applied to the format's pages or buffers.
    pub compression: Compression,
    /// Upper bound on the rows of a parquet row group. Ignored by formats without row groups.
    pub max_row_group_size: Option<usize>,
}

impl Default for FileWriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Uncompressed,
            max_row_group_size: None,
        }
    }
}

impl FileWriteOptions {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_max_row_group_size(mut self, max_row_group_size: usize) -> Self {
        self.max_row_group_size = Some(max_row_group_size);
        self
    }
}

/// The outcome of writing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: Path,
    pub num_rows: usize,
    pub size: u64,
}

/// Consumes record batches and encodes them into one file.
pub trait FileWriter: Send {
    /// The path this writer produces.
    fn path(&self) -> &Path;

    /// Appends a batch. Its schema must match the schema the writer was created with.
    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, DatasetResult<()>>;

    /// Completes the file. Nothing may be visible at [`Self::path`] before this succeeds.
    fn finish(self: Box<Self>) -> BoxFuture<'static, DatasetResult<WrittenFile>>;
}

/// A columnar file format.
pub trait FileFormat: Send + Sync + Debug {
    /// A short name, e.g. `"ipc"`.
    fn type_name(&self) -> &str;

    /// The extension written files conventionally carry, without the dot.
    fn default_extension(&self) -> &str;

    /// Whether `source` looks like a file of this format.
    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<bool>>;

    /// Reads the schema stored in `source`.
    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<SchemaRef>>;

    /// Opens `source` for reading. The returned stream yields batches in file order.
    fn scan_batches(&self, source: FileSource) -> BoxFuture<'static, DatasetResult<BatchStream>>;

    /// Creates a writer producing `path` in `store`.
    fn make_writer(
        &self,
        store: Arc<DynObjectStore>,
        path: Path,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> DatasetResult<Box<dyn FileWriter>>;

    /// The options used when a write does not specify any.
    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::default()
    }
}

// Formats in this module decode whole files; compressed containers are not unpacked.
fn require_uncompressed(format: &str, source: &FileSource) -> DatasetResult<()> {
    match source.compression() {
        Compression::Uncompressed => Ok(()),
        compression => Err(crate::Error::unsupported(format!(
            "{format} files compressed as a whole with {compression} are not supported: {source}"
        ))),
    }
}
