//! Error path E2E tests.
//!
//! Initialization failures must name the task and carry the cause; a writer
//! that began closing must refuse further records.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{shard_doc_count, write_records, TestHarness, BUNDLE_NAME};
use shard_writer::{ShardWriter, ShardWriterError};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_bundle_fails_init() {
    let harness = TestHarness::new();
    let mut ctx = harness.context(3, 0);
    ctx.staged_dirs.retain(|d| !d.ends_with(BUNDLE_NAME));

    let err = ShardWriter::open(harness.settings(), ctx).await.err().unwrap();
    match err {
        ShardWriterError::InitFailed { task, source } => {
            assert_eq!(task, "job_e2e_0000003_0");
            assert!(
                matches!(*source, ShardWriterError::MissingConfiguration(_)),
                "expected MissingConfiguration, got {:?}",
                source
            );
        }
        other => panic!("expected InitFailed, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bundle_without_schema_fails_init() {
    let harness = TestHarness::new();
    let bundle = harness
        .staged_dirs
        .iter()
        .find(|d| d.ends_with(BUNDLE_NAME))
        .unwrap();
    std::fs::remove_file(bundle.join("conf").join("schema.json")).unwrap();

    let err = harness.open_writer(0).await.err().unwrap();
    assert!(
        err.to_string().contains("schema file not found"),
        "unexpected error: {}",
        err
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unwritable_output_fails_init() {
    let harness = TestHarness::new();
    // A plain file where the shard directory should go
    std::fs::create_dir_all(&harness.output_root).unwrap();
    std::fs::write(harness.output_root.join("shard-0000000-000"), b"blocker").unwrap();

    let err = harness.open_writer(0).await.err().unwrap();
    match err {
        ShardWriterError::InitFailed { source, .. } => {
            assert!(matches!(*source, ShardWriterError::StorageInit { .. }))
        }
        other => panic!("expected InitFailed, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_after_close_is_rejected() {
    let harness = TestHarness::new();
    let writer = harness.open_writer(0).await.unwrap();
    write_records(&writer, 4).await.unwrap();
    writer.close(None).await.unwrap();

    let result = writer.write("late", json!({"title": "too late"})).await;
    assert!(matches!(result, Err(ShardWriterError::AlreadyClosing)));
    assert!(matches!(
        writer.close(None).await,
        Err(ShardWriterError::AlreadyClosing)
    ));
    assert_eq!(shard_doc_count(writer.output_dir().unwrap()), 4);
}

/// A type mismatch against the schema fails that record alone; the rest of
/// the shard still commits.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_schema_mismatch_rejects_single_record() {
    let harness = TestHarness::new();
    let writer = harness.open_writer(0).await.unwrap();

    write_records(&writer, 3).await.unwrap();
    let result = writer
        .write("bad", json!({"title": {"nested": "object"}}))
        .await;
    match result {
        Err(ShardWriterError::InvalidRecord(msg)) => assert!(msg.starts_with("bad"), "{}", msg),
        other => panic!("expected InvalidRecord, got {:?}", other),
    }

    writer.close(None).await.unwrap();
    assert_eq!(shard_doc_count(writer.output_dir().unwrap()), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_object_record_rejected() {
    let harness = TestHarness::new();
    let writer = harness.open_writer(0).await.unwrap();

    let result = writer.write("k", json!("just a string")).await;
    assert!(matches!(result, Err(ShardWriterError::InvalidRecord(_))));

    writer.close(None).await.unwrap();
}
