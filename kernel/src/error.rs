//! Definitions of errors that the dataset kernel can encounter

use std::backtrace::{Backtrace, BacktraceStatus};

use crate::arrow::error::ArrowError;
use crate::parquet::errors::ParquetError;
use crate::schema::ProjectionError;

/// A [`std::result::Result`] that has the dataset kernel [`Error`] as the error variant
pub type DatasetResult<T, E = Error> = std::result::Result<T, E>;

/// All the types of errors that the kernel can run into
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// This is an error that includes a backtrace. To have a particular type of error include such
    /// backtrace (when RUST_BACKTRACE=1), annotate the error with `#[error(transparent)]` and then
    /// add the error type and enum variant to the `from_with_backtrace!` macro invocation below.
    #[error("{source}\n{backtrace}")]
    Backtraced {
        source: Box<Self>,
        backtrace: Box<Backtrace>,
    },

    /// An error performing operations on arrow data
    #[error(transparent)]
    Arrow(ArrowError),

    /// An error reading or writing parquet data
    #[error(transparent)]
    Parquet(ParquetError),

    /// An error interacting with the object store
    #[error("Error interacting with object store: {0}")]
    ObjectStore(object_store::Error),

    /// An error converting a string into an object store path
    #[error("Object store path error: {0}")]
    ObjectStorePath(#[from] object_store::path::Error),

    /// A std io error occurred.
    #[error(transparent)]
    IOError(std::io::Error),

    /// A generic error with a message
    #[error("Generic dataset kernel error: {0}")]
    Generic(String),

    /// A generic error wrapping another error
    #[error("Generic error: {source}")]
    GenericError {
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// An expression or schema references a column that does not exist
    #[error("{0}")]
    MissingColumn(String),

    /// A schema or an expression failed validation: unknown types, incompatible operands, or an
    /// illegal schema replacement.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The schema of a dataset could not be replaced, or a fragment does not fit the schema
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// An expression could not be evaluated against a batch
    #[error("Invalid expression evaluation: {0}")]
    InvalidExpressionEvaluation(String),

    /// A path could not be parsed by a partitioning scheme
    #[error("Invalid partition path '{path}': {message}")]
    InvalidPartitionPath { path: String, message: String },

    /// Scanning a fragment failed
    #[error("Failed to scan fragment {fragment}: {source}")]
    Scan {
        /// Description of the fragment that failed
        fragment: String,
        source: Box<Self>,
    },

    /// Writing to an output file failed. Any error aborts the whole write.
    #[error("Failed to write {path}: {source}")]
    Write { path: String, source: Box<Self> },

    /// Work was abandoned because a sibling task failed or the consumer went away
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A spawned task panicked or was dropped by the executor before completing
    #[error("Task join failure: {0}")]
    JoinFailure(String),

    /// Some functionality is currently unsupported
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

// Convenience constructors for Error types that take a String argument
impl Error {
    pub fn generic_err(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::GenericError {
            source: source.into(),
        }
    }
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }
    pub fn missing_column(name: impl ToString) -> Self {
        Self::MissingColumn(name.to_string()).with_backtrace()
    }
    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }
    pub fn invalid_expression(msg: impl ToString) -> Self {
        Self::InvalidExpressionEvaluation(msg.to_string())
    }
    pub fn invalid_partition_path(path: impl ToString, message: impl ToString) -> Self {
        Self::InvalidPartitionPath {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
    pub fn scan(fragment: impl ToString, source: Error) -> Self {
        Self::Scan {
            fragment: fragment.to_string(),
            source: Box::new(source),
        }
    }
    pub fn write(path: impl ToString, source: Error) -> Self {
        Self::Write {
            path: path.to_string(),
            source: Box::new(source),
        }
    }
    pub fn cancelled(msg: impl ToString) -> Self {
        Self::Cancelled(msg.to_string())
    }
    pub fn join_failure(msg: impl ToString) -> Self {
        Self::JoinFailure(msg.to_string())
    }
    pub fn unsupported(msg: impl ToString) -> Self {
        Self::Unsupported(msg.to_string())
    }

    /// True if this error (or the error it wraps) is a validation failure of a schema or
    /// expression.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) | Self::MissingColumn(_) | Self::Projection(_) => true,
            Self::Backtraced { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    /// Strips any backtrace wrapper, yielding the underlying error
    pub fn into_inner(self) -> Self {
        match self {
            Self::Backtraced { source, .. } => source.into_inner(),
            err => err,
        }
    }

    // Capture a backtrace when the error is constructed.
    #[must_use]
    pub fn with_backtrace(self) -> Self {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Self::Backtraced {
                source: Box::new(self),
                backtrace: Box::new(backtrace),
            },
            _ => self,
        }
    }
}

macro_rules! from_with_backtrace(
    ( $(($error_type: ty, $error_variant: ident)), * ) => {
        $(
            impl From<$error_type> for Error {
                fn from(value: $error_type) -> Self {
                    Self::$error_variant(value).with_backtrace()
                }
            }
        )*
    };
);

from_with_backtrace!((std::io::Error, IOError), (ArrowError, Arrow));

impl From<ParquetError> for Error {
    fn from(value: ParquetError) -> Self {
        Self::Parquet(value).with_backtrace()
    }
}

impl From<object_store::Error> for Error {
    fn from(value: object_store::Error) -> Self {
        Self::ObjectStore(value).with_backtrace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_detected_through_backtrace() {
        let err = Error::missing_column("x");
        assert!(err.is_validation());
        assert!(matches!(err.into_inner(), Error::MissingColumn(name) if name == "x"));
        assert!(!Error::generic("boom").is_validation());
    }

    #[test]
    fn test_write_error_carries_path() {
        let err = Error::write("out/part-0.arrow", Error::generic("disk full"));
        assert_eq!(
            err.to_string(),
            "Failed to write out/part-0.arrow: Generic dataset kernel error: disk full"
        );
    }
}
