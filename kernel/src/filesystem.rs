//! Listing of files and directories in an object store.
//!
//! Object stores have no real directories. A directory is reported for every path prefix between
//! the listed base directory and a file, which is how a dataset's directory hierarchy is
//! recovered from a flat listing.

use std::collections::BTreeSet;

use futures::stream::TryStreamExt;
use object_store::path::Path;
use object_store::DynObjectStore;
use tracing::debug;

use crate::DatasetResult;

/// Whether a listed entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Directory,
    File,
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileInfo {
    pub path: Path,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn file(path: impl Into<Path>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::File,
        }
    }

    pub fn dir(path: impl Into<Path>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// The last segment of the path.
    pub fn base_name(&self) -> Option<&str> {
        self.path.filename()
    }
}

/// Lists every file below `base_dir`, and every directory between `base_dir` and those files. The
/// result is sorted by path. Entries whose name starts with one of `ignore_prefixes` are skipped
/// along with everything below them.
pub async fn list_recursive(
    store: &DynObjectStore,
    base_dir: &Path,
    ignore_prefixes: &[String],
) -> DatasetResult<Vec<FileInfo>> {
    let base_depth = base_dir.parts().count();
    let objects: Vec<_> = store.list(Some(base_dir)).try_collect().await?;
    let mut entries = BTreeSet::new();
    for object in objects {
        let parts: Vec<_> = object.location.parts().collect();
        let below_base = parts.get(base_depth..).unwrap_or_default();
        let ignored = below_base.iter().any(|part| {
            ignore_prefixes
                .iter()
                .any(|prefix| part.as_ref().starts_with(prefix.as_str()))
        });
        if ignored {
            debug!("Ignoring {}", object.location);
            continue;
        }
        for depth in base_depth + 1..parts.len() {
            entries.insert(FileInfo::dir(Path::from_iter(parts[..depth].iter().cloned())));
        }
        entries.insert(FileInfo::file(object.location));
    }
    debug!("Listed {} entries below {base_dir}", entries.len());
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;
    use object_store::{ObjectStore, PutPayload};

    use super::*;

    #[tokio::test]
    async fn test_list_recursive_derives_directories() {
        let store = Arc::new(InMemory::new());
        for path in [
            "base/NY/New York/part-0.arrow",
            "base/NY/Franklin/part-0.arrow",
            "base/CA/part-0.arrow",
            "base/_SUCCESS",
            "base/.hidden/part-0.arrow",
            "other/part-0.arrow",
        ] {
            store
                .put(&Path::from(path), PutPayload::from_static(b"x"))
                .await
                .unwrap();
        }
        let listed = list_recursive(
            store.as_ref(),
            &Path::from("base"),
            &[".".to_string(), "_".to_string()],
        )
        .await
        .unwrap();
        let expected = vec![
            FileInfo::dir("base/CA"),
            FileInfo::file("base/CA/part-0.arrow"),
            FileInfo::dir("base/NY"),
            FileInfo::dir("base/NY/Franklin"),
            FileInfo::file("base/NY/Franklin/part-0.arrow"),
            FileInfo::dir("base/NY/New York"),
            FileInfo::file("base/NY/New York/part-0.arrow"),
        ];
        assert_eq!(listed, expected);
        assert!(listed[0].is_dir());
        assert_eq!(listed[1].base_name(), Some("part-0.arrow"));
    }
}
