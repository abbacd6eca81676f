use std::sync::Arc;

use dataset_kernel::arrow::array::RecordBatch;
use dataset_kernel::format::{FileFormat, FileWriteOptions, IpcFileFormat, WrittenFile};
use dataset_kernel::object_store::path::Path;
use dataset_kernel::object_store::DynObjectStore;
use dataset_kernel::DatasetResult;

/// Writes `batches` as one Arrow IPC file at `path`.
#[allow(unused)]
pub(crate) async fn write_ipc_file(
    store: &Arc<DynObjectStore>,
    path: &str,
    batches: &[RecordBatch],
) -> DatasetResult<WrittenFile> {
    let schema = batches[0].schema();
    let mut writer = IpcFileFormat.make_writer(
        store.clone(),
        Path::from(path),
        schema,
        &FileWriteOptions::default(),
    )?;
    for batch in batches {
        writer.write(batch).await?;
    }
    writer.finish().await
}
