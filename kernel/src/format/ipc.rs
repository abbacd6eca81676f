//! The Arrow IPC file format (also known as Feather v2).

use std::io::Cursor;
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
use crate::arrow::ipc::reader::FileReader;
use crate::arrow::ipc::writer::{FileWriter as IpcWriter, IpcWriteOptions};
use crate::arrow::ipc::CompressionType;
use crate::schema::SchemaRef;
use crate::source::{Compression, FileSource};
use crate::{DatasetResult, Error};

const MAGIC: &[u8] = b"ARROW1";

/// Reads and writes Arrow IPC files. Written files may compress their buffers with
/// [`Compression::Lz4`] or [`Compression::Zstd`].
#[derive(Debug, Default, Clone, Copy)]
pub struct IpcFileFormat;

impl IpcFileFormat {
    async fn open(source: &FileSource) -> DatasetResult<FileReader<Cursor<bytes::Bytes>>> {
        require_uncompressed("ipc", source)?;
        let bytes = source.read_all().await?;
        Ok(FileReader::try_new(Cursor::new(bytes), None)?)
    }
}

impl FileFormat for IpcFileFormat {
    fn type_name(&self) -> &str {
        "ipc"
    }

    fn default_extension(&self) -> &str {
        "arrow"
    }

    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<bool>> {
        async move {
            let bytes = source.read_all().await?;
            Ok(bytes.starts_with(MAGIC) && bytes.ends_with(MAGIC))
        }
        .boxed()
    }

    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, DatasetResult<SchemaRef>> {
        async move { Ok(Self::open(source).await?.schema()) }.boxed()
    }

    fn scan_batches(&self, source: FileSource) -> BoxFuture<'static, DatasetResult<BatchStream>> {
        async move {
            let reader = Self::open(&source).await?;
            debug!("Opened {source} with {} batches", reader.num_batches());
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
            Compression::Uncompressed => None,
            Compression::Lz4 => Some(CompressionType::LZ4_FRAME),
            Compression::Zstd => Some(CompressionType::ZSTD),
            other => {
                return Err(Error::unsupported(format!(
                    "IPC files cannot be written with {other} compression"
                )))
            }
        };
        let ipc_options = IpcWriteOptions::default().try_with_compression(compression)?;
        let inner = IpcWriter::try_new_with_options(Vec::new(), &schema, ipc_options)?;
        Ok(Box::new(IpcFileWriter {
            inner,
            store,
            path,
            num_rows: 0,
        }))
    }
}

struct IpcFileWriter {
    inner: IpcWriter<Vec<u8>>,
    store: Arc<DynObjectStore>,
    path: Path,
    num_rows: usize,
}

impl FileWriter for IpcFileWriter {
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
            mut inner,
            store,
            path,
            num_rows,
        } = *self;
        async move {
            inner.finish()?;
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
