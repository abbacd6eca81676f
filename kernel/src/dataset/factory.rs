use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::DynObjectStore;
use tracing::{debug, info, warn};

use super::FileSystemDataset;
use crate::arrow::datatypes::{Schema, SchemaBuilder};
use crate::expressions::Expression;
use crate::filesystem::{list_recursive, FileInfo};
use crate::format::FileFormatRef;
use crate::partition::PartitioningRef;
use crate::schema::SchemaRef;
use crate::source::FileSource;
use crate::{DatasetResult, Error};

/// How [`FileSystemDatasetFactory`] discovers files and their partitions.
#[derive(Debug, Clone)]
pub struct FileSystemFactoryOptions {
    /// Parses directory names into partition expressions. Without one, every fragment's partition
    /// is `true`.
    pub partitioning: Option<PartitioningRef>,
    /// The directory below which segments are parsed by `partitioning`. Defaults to the base
    /// directory when discovering with [`FileSystemDatasetFactory::from_base_dir`]; directories
    /// not below it are not parsed.
    pub partition_base_dir: Option<Path>,
    /// Whether files the format cannot read are skipped rather than failing the scan later.
    pub exclude_invalid_files: bool,
    /// Names starting with one of these prefixes are ignored, along with everything below them.
    pub selector_ignore_prefixes: Vec<String>,
}

impl Default for FileSystemFactoryOptions {
    fn default() -> Self {
        Self {
            partitioning: None,
            partition_base_dir: None,
            exclude_invalid_files: false,
            selector_ignore_prefixes: vec![".".to_string(), "_".to_string()],
        }
    }
}

impl FileSystemFactoryOptions {
    pub fn with_partitioning(mut self, partitioning: PartitioningRef) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    pub fn with_partition_base_dir(mut self, base_dir: impl Into<Path>) -> Self {
        self.partition_base_dir = Some(base_dir.into());
        self
    }

    pub fn with_exclude_invalid_files(mut self, exclude: bool) -> Self {
        self.exclude_invalid_files = exclude;
        self
    }
}

/// Discovers the files of a [`FileSystemDataset`], infers its schema, and builds it.
#[derive(Debug)]
pub struct FileSystemDatasetFactory {
    store: Arc<DynObjectStore>,
    format: FileFormatRef,
    options: FileSystemFactoryOptions,
    infos: Vec<FileInfo>,
}

impl FileSystemDatasetFactory {
    /// A factory over exactly the files in `paths`. Directories between the partition base
    /// directory and each file are added to the listing so they can be parsed as partitions.
    pub fn from_paths(
        store: Arc<DynObjectStore>,
        paths: impl IntoIterator<Item = Path>,
        format: FileFormatRef,
        options: FileSystemFactoryOptions,
    ) -> Self {
        let mut infos: Vec<_> = paths.into_iter().map(FileInfo::file).collect();
        if let Some(base_dir) = &options.partition_base_dir {
            let base_depth = base_dir.parts().count();
            let mut dirs: Vec<_> = infos
                .iter()
                .filter(|info| info.path.prefix_matches(base_dir))
                .flat_map(|info| {
                    let parts: Vec<_> = info.path.parts().collect();
                    (base_depth + 1..parts.len())
                        .map(move |depth| FileInfo::dir(Path::from_iter(parts[..depth].to_vec())))
                })
                .collect();
            dirs.sort();
            dirs.dedup();
            infos.extend(dirs);
        }
        Self {
            store,
            format,
            options,
            infos,
        }
    }

    /// A factory over every file below `base_dir`.
    pub async fn from_base_dir(
        store: Arc<DynObjectStore>,
        base_dir: &Path,
        format: FileFormatRef,
        mut options: FileSystemFactoryOptions,
    ) -> DatasetResult<Self> {
        let infos =
            list_recursive(store.as_ref(), base_dir, &options.selector_ignore_prefixes).await?;
        options
            .partition_base_dir
            .get_or_insert_with(|| base_dir.clone());
        Ok(Self {
            store,
            format,
            options,
            infos,
        })
    }

    /// The discovered files, sorted by path.
    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<_> = self
            .infos
            .iter()
            .filter(|info| !info.is_dir())
            .map(|info| &info.path)
            .collect();
        files.sort();
        files
    }

    /// The schema of the first file, extended by the partition fields it does not store.
    /// Datasets without files get just the partition fields.
    pub async fn inspect(&self) -> DatasetResult<SchemaRef> {
        let infos = self.listing().await?;
        let first = infos.iter().filter(|info| !info.is_dir()).min();
        let physical = match first {
            Some(info) => {
                let source = FileSource::from_path(info.path.clone(), self.store.clone());
                self.format.inspect(&source).await?
            }
            None => Arc::new(Schema::empty()),
        };
        let stored: HashSet<&str> = physical
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        let mut builder = SchemaBuilder::from(physical.fields());
        if let Some(partitioning) = &self.options.partitioning {
            for field in partitioning.schema().fields() {
                if !stored.contains(field.name().as_str()) {
                    builder.push(field.clone());
                }
            }
        }
        Ok(Arc::new(builder.finish()))
    }

    /// Builds the dataset with the inspected schema.
    pub async fn finish(self) -> DatasetResult<FileSystemDataset> {
        let schema = self.inspect().await?;
        self.finish_with_schema(schema).await
    }

    /// Builds the dataset with `schema` as its logical schema.
    pub async fn finish_with_schema(self, schema: SchemaRef) -> DatasetResult<FileSystemDataset> {
        let infos = self.listing().await?;
        let partitions = infos
            .iter()
            .map(|info| self.partition_of(info))
            .collect::<DatasetResult<Vec<_>>>()?;
        info!(
            "Discovered {} entries for a {} dataset with schema {:?}",
            infos.len(),
            self.format.type_name(),
            schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>()
        );
        FileSystemDataset::try_new(
            schema,
            Expression::always_true(),
            self.format,
            self.store,
            infos,
            partitions,
        )
    }

    // The listing, without files the format cannot read if so configured.
    async fn listing(&self) -> DatasetResult<Vec<FileInfo>> {
        if !self.options.exclude_invalid_files {
            return Ok(self.infos.clone());
        }
        let format = &self.format;
        let store = &self.store;
        stream::iter(self.infos.iter().cloned())
            .map(|info| async move {
                if info.is_dir() {
                    return Ok::<_, Error>(Some(info));
                }
                let source = FileSource::from_path(info.path.clone(), store.clone());
                if format.is_supported(&source).await? {
                    return Ok(Some(info));
                }
                warn!(
                    "Excluding {} which is not a valid {} file",
                    info.path,
                    format.type_name()
                );
                Ok(None)
            })
            .buffered(8)
            .try_filter_map(|info| async move { Ok(info) })
            .try_collect()
            .await
    }

    fn partition_of(&self, info: &FileInfo) -> DatasetResult<Expression> {
        let (Some(partitioning), Some(base_dir)) =
            (&self.options.partitioning, &self.options.partition_base_dir)
        else {
            return Ok(Expression::always_true());
        };
        if !info.is_dir() || !info.path.prefix_matches(base_dir) {
            return Ok(Expression::always_true());
        }
        let depth = info.path.parts().count() - base_dir.parts().count();
        match (depth.checked_sub(1), info.base_name()) {
            (Some(depth), Some(segment)) => {
                let partition = partitioning.segment_expression(depth, segment)?;
                debug!("Directory {} has partition {partition}", info.path);
                Ok(partition)
            }
            _ => Ok(Expression::always_true()),
        }
    }
}
