use std::sync::Arc;
use std::time::Duration;

use dataset_kernel::arrow::array::{ArrayRef, AsArray, Int64Array, RecordBatch, StringArray};
use dataset_kernel::arrow::datatypes::{DataType, Field, Int64Type, Schema};
use dataset_kernel::arrow::util::pretty::pretty_format_batches;
use dataset_kernel::dataset::{FileSystemDatasetFactory, FileSystemFactoryOptions, InMemoryDataset};
use dataset_kernel::expressions::{column_expr, Expression};
use dataset_kernel::format::{FileFormat, IpcFileFormat, ParquetFileFormat, WrittenFile};
use dataset_kernel::functions::DefaultFunctionRegistry;
use dataset_kernel::object_store::local::LocalFileSystem;
use dataset_kernel::object_store::path::Path;
use dataset_kernel::object_store::DynObjectStore;
use dataset_kernel::partition::HivePartitioning;
use dataset_kernel::scan::{Scanner, ScannerBuilder};
use dataset_kernel::source::FileSource;
use dataset_kernel::write::{tee, write_stream, DatasetWriter, WriteOptions};
use dataset_kernel::{write_dataset, DatasetRef, DatasetResult, Error};
use futures::{StreamExt, TryStreamExt};
use test_utils::{
    assert_batches_sorted_eq, delayed_dataset, generate_sequential_batches, i64_column,
    in_memory_store, list_paths, DelayFunction, FailingFormat,
};

fn sequential_dataset(num_batches: usize, rows_per_batch: usize) -> DatasetRef {
    let batches = generate_sequential_batches(0, num_batches, rows_per_batch);
    let schema = batches[0].schema();
    Arc::new(InMemoryDataset::try_new(schema, batches).unwrap())
}

fn bucket_partitioning() -> Arc<HivePartitioning> {
    Arc::new(HivePartitioning::new(Arc::new(Schema::new(vec![Field::new(
        "bucket",
        DataType::Utf8,
        true,
    )]))))
}

async fn read_file(store: &Arc<DynObjectStore>, file: &WrittenFile) -> Vec<RecordBatch> {
    let source = FileSource::from_path(file.path.clone(), store.clone());
    IpcFileFormat
        .scan_batches(source)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

async fn rediscover(store: Arc<DynObjectStore>, base_dir: &str) -> DatasetResult<RecordBatch> {
    let factory = FileSystemDatasetFactory::from_base_dir(
        store,
        &Path::from(base_dir),
        Arc::new(IpcFileFormat),
        FileSystemFactoryOptions::default().with_partitioning(bucket_partitioning()),
    )
    .await?;
    let dataset = Arc::new(factory.finish().await?);
    ScannerBuilder::new(dataset).finish()?.to_table().await
}

// A threaded scan of two fragments whose first one is slow, through the `delay` function
fn delayed_scanner() -> Scanner {
    let registry = DefaultFunctionRegistry::new()
        .with_function(Arc::new(DelayFunction::new()))
        .unwrap();
    ScannerBuilder::new(delayed_dataset(2, 64, 2, Duration::from_millis(100)))
        .project(
            vec![
                Expression::call(DelayFunction::NAME, [column_expr!("i")]),
                column_expr!("bucket"),
            ],
            vec!["i".to_string(), "bucket".to_string()],
        )
        .use_threads(true)
        .with_function_registry(Arc::new(registry))
        .finish()
        .unwrap()
}

fn count_inversions(values: &[i64]) -> usize {
    values.windows(2).filter(|pair| pair[0] > pair[1]).count()
}

#[tokio::test]
async fn test_write_projected_columns() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let scanner = ScannerBuilder::new(sequential_dataset(4, 3))
        .project(
            vec![column_expr!("i") * Expression::literal(10i64)],
            vec!["ten_i".to_string()],
        )
        .filter(column_expr!("i").lt(Expression::literal(6i64)))
        .finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "out");
    let files = write_dataset(options, &scanner).await?;

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path.to_string(), "out/part-0.arrow");
    assert_eq!(files[0].num_rows, 6);
    let batches = read_file(&store, &files[0]).await;
    assert_eq!(i64_column(&batches, "ten_i"), vec![0, 10, 20, 30, 40, 50]);
    assert_eq!(list_paths(store.as_ref()).await?, vec!["out/part-0.arrow"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_preserves_order() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "ordered")
        .with_partitioning(bucket_partitioning())
        .with_preserve_order(true);
    let files = write_dataset(options, &delayed_scanner()).await?;

    let paths: Vec<_> = files.iter().map(|file| file.path.to_string()).collect();
    assert_eq!(
        paths,
        vec![
            "ordered/bucket=0/part-0.arrow",
            "ordered/bucket=1/part-0.arrow",
            "ordered/bucket=2/part-0.arrow",
            "ordered/bucket=3/part-0.arrow",
        ]
    );
    for file in &files {
        let values = i64_column(&read_file(&store, file).await, "i");
        assert_eq!(values.len(), 64, "{}", file.path);
        assert_eq!(count_inversions(&values), 0, "{}: {values:?}", file.path);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_without_order_follows_completion() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "unordered")
        .with_partitioning(bucket_partitioning());
    let files = write_dataset(options, &delayed_scanner()).await?;
    assert_eq!(files.len(), 4);

    // The second fragment finishes while the first is still waiting, so its rows come first
    let mut inversions = 0;
    let mut rows = 0;
    for file in &files {
        let values = i64_column(&read_file(&store, file).await, "i");
        inversions += count_inversions(&values);
        rows += values.len();
    }
    assert_eq!(rows, 256);
    assert!(inversions > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serial_and_parallel_writes_agree() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    for (dir, use_threads) in [("serial", false), ("parallel", true)] {
        let scanner = ScannerBuilder::new(sequential_dataset(8, 5))
            .use_threads(use_threads)
            .finish()?;
        let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), dir)
            .with_preserve_order(true);
        let files = write_dataset(options, &scanner).await?;
        assert_eq!(files.len(), 1);
        let values = i64_column(&read_file(&store, &files[0]).await, "i");
        assert_eq!(values, (0..40).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_partitioned_write_rediscovers() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let scanner = ScannerBuilder::new(sequential_dataset(3, 4)).finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "hive")
        .with_partitioning(bucket_partitioning());
    let files = write_dataset(options, &scanner).await?;
    assert_eq!(files.len(), 4);
    assert!(files.iter().all(|file| file.num_rows == 3));

    // Partition columns live only in the directory names
    let batches = read_file(&store, &files[0]).await;
    assert_eq!(batches[0].schema().fields().len(), 1);

    let table = rediscover(store, "hive").await?;
    let expected = pretty_format_batches(&[scanner.to_table().await?])?.to_string();
    let expected: Vec<_> = expected.trim().lines().collect();
    assert_batches_sorted_eq!(expected, &[table]);
    Ok(())
}

#[tokio::test]
async fn test_partition_values_are_escaped() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let batch = RecordBatch::try_from_iter(vec![
        ("i", Arc::new(Int64Array::from(vec![0, 1, 2, 3])) as ArrayRef),
        (
            "bucket",
            Arc::new(StringArray::from(vec!["a/b", "c", "", "a/b"])) as ArrayRef,
        ),
    ])?;
    let schema = batch.schema();
    let input = futures::stream::iter([Ok(batch)]).boxed();
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "out")
        .with_partitioning(bucket_partitioning());
    write_stream(options, schema, input).await?;
    assert_eq!(
        list_paths(store.as_ref()).await?,
        vec![
            "out/bucket=/part-0.arrow",
            "out/bucket=a%2Fb/part-0.arrow",
            "out/bucket=c/part-0.arrow",
        ]
    );

    let table = rediscover(store, "out").await?;
    let ids = table.column_by_name("i").unwrap().as_primitive::<Int64Type>();
    let buckets = table.column_by_name("bucket").unwrap().as_string::<i32>();
    let mut rows: Vec<_> = ids
        .values()
        .iter()
        .copied()
        .zip(buckets.iter().flatten())
        .collect();
    rows.sort_unstable();
    assert_eq!(rows, vec![(0, "a/b"), (1, "c"), (2, ""), (3, "a/b")]);
    Ok(())
}

#[tokio::test]
async fn test_max_rows_per_file() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let scanner = ScannerBuilder::new(sequential_dataset(10, 3)).finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "rolled")
        .with_basename_template("chunk-{i}.arrow")
        .with_max_rows_per_file(7)
        .with_preserve_order(true);
    let files = write_dataset(options, &scanner).await?;

    let summary: Vec<_> = files
        .iter()
        .map(|file| (file.path.to_string(), file.num_rows))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("rolled/chunk-0.arrow".to_string(), 7),
            ("rolled/chunk-1.arrow".to_string(), 7),
            ("rolled/chunk-2.arrow".to_string(), 7),
            ("rolled/chunk-3.arrow".to_string(), 7),
            ("rolled/chunk-4.arrow".to_string(), 2),
        ]
    );
    let mut values = vec![];
    for file in &files {
        values.extend(i64_column(&read_file(&store, file).await, "i"));
    }
    assert_eq!(values, (0..30).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rolled_files_read_back_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let scanner = ScannerBuilder::new(sequential_dataset(12, 1))
        .use_threads(true)
        .finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "rolled")
        .with_max_rows_per_file(1)
        .with_preserve_order(true);
    let files = write_dataset(options, &scanner).await?;
    assert_eq!(files.len(), 12);
    assert_eq!(files[11].path.to_string(), "rolled/part-11.arrow");

    // part-10 and part-11 must not be read before part-2
    let table = rediscover(store, "rolled").await?;
    assert_eq!(i64_column(&[table], "i"), (0..12).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_invalid_write_options() {
    let scanner = ScannerBuilder::new(sequential_dataset(1, 1)).finish().unwrap();
    let store = in_memory_store();
    let base = || WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "bad");
    let invalid = [
        base().with_basename_template("data.arrow"),
        base().with_basename_template("nested/part-{i}.arrow"),
        base().with_max_rows_per_file(0),
        base().with_max_partitions(0),
        base().with_max_pending(0),
    ];
    for options in invalid {
        let template = options.basename_template().to_string();
        let err = write_dataset(options, &scanner).await.unwrap_err();
        assert!(err.is_validation(), "{template}: {err}");
    }

    // Partition fields must be written columns of the same type
    let mistyped = Arc::new(HivePartitioning::new(Arc::new(Schema::new(vec![Field::new(
        "bucket",
        DataType::Int32,
        true,
    )]))));
    let err = write_dataset(base().with_partitioning(mistyped), &scanner)
        .await
        .unwrap_err();
    assert!(err.is_validation(), "{err}");
    let missing = Arc::new(HivePartitioning::new(Arc::new(Schema::new(vec![Field::new(
        "nope",
        DataType::Utf8,
        true,
    )]))));
    let err = write_dataset(base().with_partitioning(missing), &scanner)
        .await
        .unwrap_err();
    assert!(matches!(err.into_inner(), Error::MissingColumn(_)));

    assert!(list_paths(store.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_too_many_partitions() {
    let scanner = ScannerBuilder::new(sequential_dataset(2, 8)).finish().unwrap();
    let options = WriteOptions::new(in_memory_store(), Arc::new(IpcFileFormat), "out")
        .with_partitioning(bucket_partitioning())
        .with_max_partitions(3);
    let err = write_dataset(options, &scanner).await.unwrap_err();
    assert!(err.is_validation(), "{err}");
}

#[tokio::test]
async fn test_sink_failure_fails_the_write() {
    let _ = tracing_subscriber::fmt::try_init();
    let scanner = ScannerBuilder::new(sequential_dataset(40, 2)).finish().unwrap();
    let options = WriteOptions::new(in_memory_store(), Arc::new(FailingFormat::new(2)), "out")
        .with_basename_template("part-{i}.arrow");
    let err = write_dataset(options, &scanner).await.unwrap_err();
    match err.into_inner() {
        Error::Write { path, source } => {
            assert!(path.starts_with("out"), "{path}");
            assert!(source.to_string().contains("injected sink failure"), "{source}");
        }
        err => panic!("expected a write error, got {err}"),
    }
}

#[tokio::test]
async fn test_sink_failure_aborts_other_sinks() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let batch = |values: Vec<i64>, buckets: Vec<&str>| {
        RecordBatch::try_from_iter(vec![
            ("i", Arc::new(Int64Array::from(values)) as ArrayRef),
            ("bucket", Arc::new(StringArray::from(buckets)) as ArrayRef),
        ])
    };
    // Every bucket gets a file, then only bucket a receives more rows than its writer accepts
    let mut batches = vec![batch(vec![0, 1, 2], vec!["a", "b", "c"])?];
    for i in 3..40 {
        batches.push(batch(vec![i], vec!["a"])?);
    }
    let schema = batches[0].schema();
    let options = WriteOptions::new(store.clone(), Arc::new(FailingFormat::new(2)), "out")
        .with_partitioning(bucket_partitioning());
    let input = futures::stream::iter(batches.into_iter().map(Ok)).boxed();
    let err = write_stream(options, schema, input).await.unwrap_err();
    match err.into_inner() {
        Error::Write { path, source } => {
            assert!(path.starts_with("out/bucket=a"), "{path}");
            assert!(source.to_string().contains("injected sink failure"), "{source}");
        }
        err => panic!("expected a write error, got {err}"),
    }

    // The sinks of b and c were aborted rather than finishing their files
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(list_paths(store.as_ref()).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_held_groups_are_capped() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    // 31 fragments finish while the first one waits
    let scanner = ScannerBuilder::new(delayed_dataset(32, 1, 4, Duration::from_millis(300)))
        .use_threads(true)
        .fragment_readahead(2)
        .batch_readahead(2)
        .finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "capped")
        .with_preserve_order(true)
        .with_max_pending(4);
    let mut writer = DatasetWriter::try_new(options, scanner.schema().clone())?;
    writer.write_scan(&scanner).await?;

    // Open fragments and computed batches may still land once the limit is reached
    let peak = writer.peak_pending();
    assert!((4..=4 + 2 + 2).contains(&peak), "held {peak} groups");
    let files = writer.finish().await?;
    assert_eq!(files.len(), 1);
    let values = i64_column(&read_file(&store, &files[0]).await, "i");
    assert_eq!(values, (0..128).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_tee_returns_written_batches() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let scanner = ScannerBuilder::new(sequential_dataset(5, 2))
        .filter(column_expr!("bucket").ne(Expression::literal("3")))
        .finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "tee")
        .with_partitioning(bucket_partitioning());
    let returned: Vec<RecordBatch> = tee(options, &scanner)?.try_collect().await?;

    assert_eq!(i64_column(&returned, "i"), vec![0, 1, 2, 4, 5, 6, 8, 9]);
    assert_eq!(
        list_paths(store.as_ref()).await?,
        vec![
            "tee/bucket=0/part-0.arrow",
            "tee/bucket=1/part-0.arrow",
            "tee/bucket=2/part-0.arrow",
        ]
    );
    let table = rediscover(store, "tee").await?;
    assert_eq!(table.num_rows(), 8);
    Ok(())
}

#[tokio::test]
async fn test_write_stream_and_parquet() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = in_memory_store();
    let batches = generate_sequential_batches(0, 3, 4);
    let schema = batches[0].schema();
    let input = futures::stream::iter(batches.into_iter().map(Ok)).boxed();
    let options = WriteOptions::new(store.clone(), Arc::new(ParquetFileFormat::default()), "pq");
    let files = write_stream(options, schema, input).await?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path.to_string(), "pq/part-0.parquet");
    assert_eq!(files[0].num_rows, 12);

    let factory = FileSystemDatasetFactory::from_base_dir(
        store,
        &Path::from("pq"),
        Arc::new(ParquetFileFormat::default()),
        FileSystemFactoryOptions::default(),
    )
    .await?;
    let dataset = Arc::new(factory.finish().await?);
    let scanner = ScannerBuilder::new(dataset)
        .filter(column_expr!("i").ge(Expression::literal(10i64)))
        .finish()?;
    assert_eq!(i64_column(&scanner.to_batches().await?, "i"), vec![10, 11]);
    Ok(())
}

#[tokio::test]
async fn test_local_file_system_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir()?;
    let store: Arc<DynObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(dir.path())?);
    let scanner = ScannerBuilder::new(sequential_dataset(4, 4)).finish()?;
    let options = WriteOptions::new(store.clone(), Arc::new(IpcFileFormat), "data")
        .with_partitioning(bucket_partitioning())
        .with_preserve_order(true);
    let files = write_dataset(options, &scanner).await?;
    assert_eq!(files.len(), 4);
    assert!(dir.path().join("data/bucket=2/part-0.arrow").is_file());

    let table = rediscover(store, "data").await?;
    assert_eq!(table.num_rows(), 16);
    let mut values = i64_column(&[table], "i");
    values.sort_unstable();
    assert_eq!(values, (0..16).collect::<Vec<_>>());
    Ok(())
}
