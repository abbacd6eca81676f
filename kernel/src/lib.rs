//! # Dataset Kernel
//!
//! Dataset Kernel treats a directory tree of columnar files (or a set of in-memory record
//! batches) as one logical table. It covers four steps:
//!
//! - **Discovery**: a [`dataset::FileSystemDatasetFactory`] lists a base directory. It parses
//!   every directory name with a [`partition::Partitioning`] into a partition expression such as
//!   `year = 2009`, and infers a schema.
//! - **Pruning**: [`Dataset::get_fragments`] returns only the fragments whose partition
//!   expressions are consistent with a filter. The filter is evaluated with three-valued logic
//!   over the field values those expressions guarantee, so whole subtrees of the directory
//!   hierarchy are skipped without reading a byte.
//! - **Scanning**: a [`scan::Scanner`] reads the surviving fragments concurrently and applies the
//!   filter and a projection to every batch. Each batch is labelled with the position it would
//!   have had in a sequential scan.
//! - **Writing**: [`write::write_dataset`] splits batches by partition values and writes them to
//!   one sink per directory. Optionally it restores the sequential order from the labels.
//!
//! Concurrency is delegated to a [`engine::executor::TaskExecutor`]. Function calls in filters
//! and projections are resolved through an injected [`functions::FunctionRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dataset_kernel::dataset::{FileSystemDatasetFactory, FileSystemFactoryOptions};
//! use dataset_kernel::expressions::{column_expr, Expression};
//! use dataset_kernel::format::IpcFileFormat;
//! use dataset_kernel::scan::ScannerBuilder;
//!
//! let factory = FileSystemDatasetFactory::from_base_dir(
//!     store, &base_dir, Arc::new(IpcFileFormat), FileSystemFactoryOptions::default(),
//! ).await?;
//! let dataset = Arc::new(factory.finish().await?);
//! let table = ScannerBuilder::new(dataset)
//!     .filter(column_expr!("city").eq(Expression::literal("Franklin")))
//!     .use_threads(true)
//!     .finish()?
//!     .to_table()
//!     .await?;
//! ```

#![deny(
    rust_2018_idioms,
    rust_2021_compatibility,
    missing_debug_implementations,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::result_large_err)]

/// Re-exports of the arrow-rs crates the kernel is built on.
pub use arrow;
pub use object_store;
pub use parquet;

pub mod dataset;
pub mod engine;
pub mod error;
pub mod expressions;
pub mod filesystem;
pub mod format;
pub mod fragment;
pub mod functions;
pub mod partition;
pub mod predicates;
pub mod scan;
pub mod schema;
pub mod source;
pub mod write;

pub(crate) mod utils;

pub use dataset::{Dataset, DatasetRef};
pub use error::{DatasetResult, Error};
pub use expressions::Expression;
pub use fragment::{Fragment, FragmentRef};
pub use scan::{Scanner, ScannerBuilder, SequenceNumber, SequencedBatch};
pub use write::{write_dataset, WriteOptions};
