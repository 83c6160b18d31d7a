//! Full lifecycle E2E tests: open, write, close, then read the shard back.

use pretty_assertions::assert_eq;

use e2e_tests::{search_ids, shard_doc_count, write_records, TestHarness};
use shard_writer::{LifecycleState, COUNTER_GROUP};

/// 123 records at batch size 50 end up as three batches and 123 documents.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_123_records_in_batches_of_50() {
    let harness = TestHarness::new();
    let settings = shard_writer::ShardWriterSettings {
        batch_size: 50,
        ..harness.settings()
    };
    let writer = shard_writer::ShardWriter::open(settings, harness.context(0, 0))
        .await
        .unwrap();

    write_records(&writer, 123).await.unwrap();
    writer.close(None).await.unwrap();

    let shard_dir = writer.output_dir().unwrap();
    assert_eq!(shard_doc_count(shard_dir), 123);

    let reporter = &harness.reporter;
    assert_eq!(reporter.counter(COUNTER_GROUP, "batches_written"), 3);
    assert_eq!(reporter.counter(COUNTER_GROUP, "documents_written"), 123);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shard_directory_layout() {
    let harness = TestHarness::new();
    let writer = shard_writer::ShardWriter::open(harness.settings(), harness.context(17, 2))
        .await
        .unwrap();
    writer.close(None).await.unwrap();

    let shard_dir = writer.output_dir().unwrap();
    assert_eq!(shard_dir, harness.output_root.join("shard-0000017-002"));
    assert!(shard_dir.join("data").join("meta.json").is_file());
    assert_eq!(shard_doc_count(shard_dir), 0);
}

/// Record keys land in the `id` field and are searchable alongside the body.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keys_stored_in_unique_field() {
    let harness = TestHarness::new();
    let writer = harness.open_writer(1).await.unwrap();

    write_records(&writer, 12).await.unwrap();
    writer.close(None).await.unwrap();

    let mut ids = search_ids(writer.output_dir().unwrap(), "number", 100);
    ids.sort();
    let mut expected: Vec<String> = (0..12).map(|i| format!("doc-{}", i)).collect();
    expected.sort();
    assert_eq!(ids, expected);

    let exact = search_ids(writer.output_dir().unwrap(), "\"record number 7\"", 10);
    assert_eq!(exact, vec!["doc-7".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_reports_staged_statuses() {
    let harness = TestHarness::new();
    let writer = harness.open_writer(2).await.unwrap();
    write_records(&writer, 3).await.unwrap();

    let context = std::sync::Arc::new(shard_writer::LoggingReporter::new());
    writer.close(Some(context.clone())).await.unwrap();

    assert_eq!(writer.state(), LifecycleState::Closed);
    assert_eq!(context.status(), Some("Done".to_string()));
    assert!(harness.reporter.counter(COUNTER_GROUP, "commit_millis") < 60_000);
    assert!(!writer.liveness().is_protecting());
}

/// Several task attempts writing their own shards at the same time.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_shards_are_independent() {
    let harness = std::sync::Arc::new(TestHarness::new());

    let mut handles = Vec::new();
    for partition in 0..3u32 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let writer = harness.open_writer(partition).await.unwrap();
            write_records(&writer, 20 + partition as usize).await.unwrap();
            writer.close(None).await.unwrap();
            writer.output_dir().unwrap().to_path_buf()
        }));
    }

    for (partition, handle) in handles.into_iter().enumerate() {
        let shard_dir = handle.await.unwrap();
        assert_eq!(shard_doc_count(&shard_dir), 20 + partition as u64);
    }
    assert_eq!(
        harness.reporter.counter(COUNTER_GROUP, "documents_written"),
        20 + 21 + 22
    );
}
