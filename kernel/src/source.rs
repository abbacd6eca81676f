//! Locators for the bytes of one data file.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::DynObjectStore;
use strum::{AsRefStr, Display as StrumDisplay, EnumString};

use crate::DatasetResult;

/// A compression codec. For a [`FileSource`] this is the codec of the whole file; for
/// [`FileWriteOptions`](crate::format::FileWriteOptions) it is the codec a format applies to its
/// pages or buffers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, EnumString, StrumDisplay, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    #[default]
    Uncompressed,
    Gzip,
    Bz2,
    Lz4,
    Zstd,
    Brotli,
    Snappy,
}

impl Compression {
    /// The codec conventionally implied by a file extension, e.g. `gz` for [`Compression::Gzip`].
    /// Unknown extensions mean the file is uncompressed.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Self::Gzip,
            "bz2" => Self::Bz2,
            "lz4" => Self::Lz4,
            "zst" | "zstd" => Self::Zstd,
            "br" => Self::Brotli,
            "snappy" => Self::Snappy,
            _ => Self::Uncompressed,
        }
    }

    /// The codec implied by the extension of `path`.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .map_or(Self::Uncompressed, Self::from_extension)
    }
}

#[derive(Debug, Clone)]
enum SourceKind {
    Path {
        path: Path,
        store: Arc<DynObjectStore>,
    },
    Buffer(Bytes),
}

/// The location of a file's bytes: either a path in an object store, or a buffer in memory.
/// Cloning is cheap.
#[derive(Debug, Clone)]
pub struct FileSource {
    kind: SourceKind,
    compression: Compression,
}

impl FileSource {
    /// A source for `path` in `store`. The compression is inferred from the path's extension.
    pub fn from_path(path: Path, store: Arc<DynObjectStore>) -> Self {
        let compression = Compression::from_path(&path);
        Self {
            kind: SourceKind::Path { path, store },
            compression,
        }
    }

    /// A source for data already in memory.
    pub fn from_buffer(buffer: impl Into<Bytes>) -> Self {
        Self {
            kind: SourceKind::Buffer(buffer.into()),
            compression: Compression::Uncompressed,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            SourceKind::Path { path, .. } => Some(path),
            SourceKind::Buffer(_) => None,
        }
    }

    pub fn store(&self) -> Option<&Arc<DynObjectStore>> {
        match &self.kind {
            SourceKind::Path { store, .. } => Some(store),
            SourceKind::Buffer(_) => None,
        }
    }

    pub fn buffer(&self) -> Option<&Bytes> {
        match &self.kind {
            SourceKind::Path { .. } => None,
            SourceKind::Buffer(buffer) => Some(buffer),
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Fetches the whole file.
    pub async fn read_all(&self) -> DatasetResult<Bytes> {
        match &self.kind {
            SourceKind::Path { path, store } => Ok(store.get(path).await?.bytes().await?),
            SourceKind::Buffer(buffer) => Ok(buffer.clone()),
        }
    }
}

/// Two sources are equal if they name the same path in the same store, or hold equal buffers.
impl PartialEq for FileSource {
    fn eq(&self, other: &Self) -> bool {
        let same_kind = match (&self.kind, &other.kind) {
            (
                SourceKind::Path { path, store },
                SourceKind::Path {
                    path: other_path,
                    store: other_store,
                },
            ) => path == other_path && Arc::ptr_eq(store, other_store),
            (SourceKind::Buffer(buffer), SourceKind::Buffer(other_buffer)) => {
                buffer == other_buffer
            }
            _ => false,
        };
        same_kind && self.compression == other.compression
    }
}

impl Display for FileSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SourceKind::Path { path, .. } => write!(f, "{path}"),
            SourceKind::Buffer(buffer) => write!(f, "<buffer of {} bytes>", buffer.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use object_store::memory::InMemory;
    use object_store::PutPayload;

    use super::*;

    #[test]
    fn test_compression_from_path() {
        let cases = [
            ("data/part-0.arrow", Compression::Uncompressed),
            ("data/part-0.csv.gz", Compression::Gzip),
            ("data/part-0.json.ZST", Compression::Zstd),
            ("data/part-0.bz2", Compression::Bz2),
            ("data/part-0.lz4", Compression::Lz4),
            ("data/part-0.br", Compression::Brotli),
            ("data/part-0", Compression::Uncompressed),
        ];
        for (path, expected) in cases {
            assert_eq!(Compression::from_path(&Path::from(path)), expected, "{path}");
        }
        assert_eq!(Compression::from_str("zstd").unwrap(), Compression::Zstd);
        assert_eq!(Compression::Snappy.to_string(), "snappy");
    }

    #[tokio::test]
    async fn test_sources() {
        let store: Arc<DynObjectStore> = Arc::new(InMemory::new());
        let path = Path::from("a/b.arrow");
        store
            .put(&path, PutPayload::from_static(b"hello"))
            .await
            .unwrap();

        let from_path = FileSource::from_path(path.clone(), store.clone());
        assert_eq!(from_path.path(), Some(&path));
        assert!(from_path.buffer().is_none());
        assert_eq!(from_path.read_all().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(from_path, FileSource::from_path(path.clone(), store.clone()));
        assert_ne!(
            from_path,
            FileSource::from_path(path.clone(), Arc::new(InMemory::new()))
        );
        assert_eq!(from_path.to_string(), "a/b.arrow");

        let from_buffer = FileSource::from_buffer(Bytes::from_static(b"hello"));
        assert_eq!(from_buffer.read_all().await.unwrap(), Bytes::from_static(b"hello"));
        assert_ne!(from_path, from_buffer);
        assert_eq!(from_buffer, FileSource::from_buffer(b"hello".to_vec()));
        assert_ne!(
            from_buffer,
            FileSource::from_buffer(b"hello".to_vec()).with_compression(Compression::Gzip)
        );
        assert_eq!(from_buffer.to_string(), "<buffer of 5 bytes>");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let store: Arc<DynObjectStore> = Arc::new(InMemory::new());
        let source = FileSource::from_path(Path::from("nope.arrow"), store);
        assert!(source.read_all().await.is_err());
    }
}
