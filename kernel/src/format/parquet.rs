//! The Apache Parquet file format.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use object_store::path::Path;
use object_store::{DynObjectStore, PutPayload};
use tracing::debug;

use super::{
    require_uncompressed, BatchStream, FileFormat, FileWriteOptions, FileWriter, WrittenFile,
};
use crate::arrow::array::RecordBatch;
use crate::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use crate::parquet::arrow::ArrowWriter;
use crate::parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use crate::parquet::file::properties::WriterProperties;
use crate::schema::SchemaRef;
use crate::source::{Compression, FileSource};
use crate::{DatasetResult, Error};

const MAGIC: &[u8] = b"PAR1";

/// Reads and writes parquet files.
#[derive(Debug, Clone)]
pub struct ParquetFileFormat {
    batch_size: usize,
}

impl Default for ParquetFileFormat {
    fn default() -> Self {
        Self { batch_size: 1024 }
    }
}

impl ParquetFileFormat {
    /// The maximum number of rows per batch when reading.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    async fn open(
        source: &FileSource,
    ) -> DatasetResult<ParquetRecordBatchReaderBuilder<bytes::Bytes>> {
        require_uncompressed("parquet", source)?;
        let bytes = source.read_all().await?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(bytes)?)
    }
}

impl FileFormat for ParquetFileFormat {
    fn type_name(&self) -> &str {
        "parquet"
    }

    fn default_extension(&self) -> &str {
        "parquet"
    }

    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<bool>> {
        async move {
            let bytes = source.read_all().await?;
            Ok(bytes.len() >= 2 * MAGIC.len()
                && bytes.starts_with(MAGIC)
                && bytes.ends_with(MAGIC))
        }
        .boxed()
    }

    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<SchemaRef>> {
        async move { Ok(Self::open(source).await?.schema().clone()) }.boxed()
    }

    fn scan_batches(&self, source: FileSource) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        let batch_size = self.batch_size;
        async move {
            let builder = Self::open(&source).await?;
            debug!(
                "Opened {source} with {} row groups",
                builder.metadata().num_row_groups()
            );
            let reader = builder.with_batch_size(batch_size).build()?;
            Ok(stream::iter(reader.map(|batch| batch.map_err(Error::from))).boxed())
        }
        .boxed()
    }

    fn make_writer(
        &self,
        store: Arc<DynObjectStore>,
        path: Path,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> DatasetResult<Box<dyn FileWriter>> {
        let compression = match options.compression {
            Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Lz4 => ParquetCompression::LZ4_RAW,
            Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
            Compression::Brotli => ParquetCompression::BROTLI(Default::default()),
            Compression::Bz2 => {
                return Err(Error::unsupported(
                    "Parquet files cannot be written with bz2 compression",
                ))
            }
        };
        let mut properties = WriterProperties::builder().set_compression(compression);
        if let Some(max_row_group_size) = options.max_row_group_size {
            properties = properties.set_max_row_group_size(max_row_group_size);
        }
        let inner = ArrowWriter::try_new(Vec::new(), schema, Some(properties.build()))?;
        Ok(Box::new(ParquetFileWriter {
            inner,
            store,
            path,
            num_rows: 0,
        }))
    }
}

struct ParquetFileWriter {
    inner: ArrowWriter<Vec<u8>>,
    store: Arc<DynObjectStore>,
    path: Path,
    num_rows: usize,
}

impl FileWriter for ParquetFileWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, DatasetResult<()>> {
        let result = self.inner.write(batch).map_err(Error::from);
        self.num_rows += batch.num_rows();
        futures::future::ready(result).boxed()
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, DatasetResult<WrittenFile>> {
        let Self {
            inner,
            store,
            path,
            num_rows,
        } = *self;
        async move {
            // Closing writes the footer
            let buffer = inner.into_inner()?;
            let size = buffer.len() as u64;
            store.put(&path, PutPayload::from(buffer)).await?;
            Ok(WrittenFile {
                path,
                num_rows,
                size,
            })
        }
        .boxed()
    }
}
