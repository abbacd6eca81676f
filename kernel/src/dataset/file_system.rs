use std::sync::Arc;

use object_store::path::Path;
use object_store::DynObjectStore;
use tracing::debug;

use super::{Dataset, DatasetRef, FragmentIterator};
use crate::expressions::{bind_partition, Expression};
use crate::filesystem::FileInfo;
use crate::format::FileFormatRef;
use crate::fragment::{FileFragment, FragmentRef};
use crate::partition::PartitionTree;
use crate::schema::{check_projectable, SchemaRef};
use crate::source::FileSource;
use crate::utils::require;
use crate::{DatasetResult, Error};

/// A dataset of files in an object store, organized by the directory hierarchy they live in.
///
/// Every listed file becomes one [`FileFragment`]; directories never do. The partition
/// expression of a fragment is the conjunction of the expressions of the file and of all the
/// directories above it, and filters are pruned directory by directory.
#[derive(Debug, Clone)]
pub struct FileSystemDataset {
    schema: SchemaRef,
    root_partition: Expression,
    format: FileFormatRef,
    store: Arc<DynObjectStore>,
    tree: Arc<PartitionTree>,
    fragments: Arc<[Arc<FileFragment>]>,
}

impl FileSystemDataset {
    /// Creates a dataset from a listing. `partitions` holds the partition expression of each
    /// entry of `infos` (a directory's own expression, not including its ancestors); if it is
    /// empty every entry gets `true`. Fragments are ordered by path.
    pub fn try_new(
        schema: SchemaRef,
        root_partition: Expression,
        format: FileFormatRef,
        store: Arc<DynObjectStore>,
        infos: Vec<FileInfo>,
        partitions: Vec<Expression>,
    ) -> DatasetResult<Self> {
        let partitions = if partitions.is_empty() {
            vec![Expression::always_true(); infos.len()]
        } else {
            partitions
        };
        require!(
            partitions.len() == infos.len(),
            Error::generic(format!(
                "Got {} partition expressions for {} listed entries",
                partitions.len(),
                infos.len()
            ))
        );
        // Literals take the types of the columns they describe, as bound filters' literals do
        let root_partition = bind_partition(&root_partition, &schema)?;
        let partitions = partitions
            .iter()
            .map(|partition| bind_partition(partition, &schema))
            .collect::<DatasetResult<Vec<_>>>()?;
        let tree = Arc::new(PartitionTree::try_new(infos.into_iter().zip(partitions))?);
        let fragments: Arc<[_]> = tree
            .fragment_nodes()
            .map(|node| {
                let source = FileSource::from_path(node.path.clone(), store.clone());
                Arc::new(FileFragment::new(
                    source,
                    format.clone(),
                    node.partition.clone(),
                ))
            })
            .collect();
        debug!(
            "Created {} dataset of {} files with root partition {root_partition}",
            format.type_name(),
            fragments.len()
        );
        Ok(Self {
            schema,
            root_partition,
            format,
            store,
            tree,
            fragments,
        })
    }

    pub fn format(&self) -> &FileFormatRef {
        &self.format
    }

    pub fn store(&self) -> &Arc<DynObjectStore> {
        &self.store
    }

    /// The paths of all files, in fragment order.
    pub fn files(&self) -> Vec<&Path> {
        self.tree.fragment_nodes().map(|node| &node.path).collect()
    }

    /// All fragments, unpruned.
    pub fn fragments(&self) -> &[Arc<FileFragment>] {
        &self.fragments
    }
}

impl Dataset for FileSystemDataset {
    fn type_name(&self) -> &str {
        "filesystem"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn partition_expression(&self) -> &Expression {
        &self.root_partition
    }

    fn get_fragments_impl(&self, filter: Expression) -> DatasetResult<FragmentIterator> {
        let fragments = self.fragments.clone();
        let pruned = self
            .tree
            .prune(filter, self.root_partition.known_field_values());
        Ok(Box::new(
            pruned.map(move |i| fragments[i].clone() as FragmentRef),
        ))
    }

    fn replace_schema(&self, schema: SchemaRef) -> DatasetResult<DatasetRef> {
        check_projectable(&self.schema, &schema)?;
        Ok(Arc::new(Self {
            schema,
            ..self.clone()
        }))
    }
}
