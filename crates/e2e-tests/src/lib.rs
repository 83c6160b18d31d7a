//! End-to-end test infrastructure for the shard writer.
//!
//! Provides a shared TestHarness that stages a configuration bundle the way
//! the distributed cache would, plus helpers to open writers and inspect the
//! finished shard with Tantivy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use shard_index::SCHEMA_FILE_NAME;
use shard_writer::{
    LoggingReporter, ShardContext, ShardWriter, ShardWriterError, ShardWriterSettings,
    TaskAttemptId,
};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value as _, STORED, STRING, TEXT};
use tantivy::{Index, TantivyDocument};

/// Bundle name used by every harness.
pub const BUNDLE_NAME: &str = "myconf.zip";

/// Shared test harness for E2E tests.
///
/// Stages a bundle and an unrelated directory under a temp dir, and provides
/// an output root for shards.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Directories "staged by the cache"
    pub staged_dirs: Vec<PathBuf>,
    /// Job output root
    pub output_root: PathBuf,
    /// Host reporter shared by every writer the harness opens
    pub reporter: Arc<LoggingReporter>,
}

impl TestHarness {
    /// Create a harness with a staged bundle carrying [`test_schema`].
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let cache = temp_dir.path().join("cache");

        let other = cache.join("other");
        std::fs::create_dir_all(other.join("conf")).expect("Failed to stage other dir");

        let bundle = cache.join(BUNDLE_NAME);
        std::fs::create_dir_all(bundle.join("conf")).expect("Failed to stage bundle");
        std::fs::create_dir_all(bundle.join("lib")).expect("Failed to stage bundle lib");
        std::fs::write(
            bundle.join("conf").join(SCHEMA_FILE_NAME),
            serde_json::to_string(&test_schema()).expect("Failed to serialize schema"),
        )
        .expect("Failed to write schema");

        let output_root = temp_dir.path().join("output");

        Self {
            _temp_dir: temp_dir,
            staged_dirs: vec![other, bundle],
            output_root,
            reporter: Arc::new(LoggingReporter::new()),
        }
    }

    /// Settings for tests: small batches and a small writer budget.
    pub fn settings(&self) -> ShardWriterSettings {
        ShardWriterSettings {
            batch_size: 5,
            writer_threads: 2,
            writer_queue_size: 4,
            bundle_name: BUNDLE_NAME.to_string(),
            writer_memory_mb: 15,
            ..Default::default()
        }
    }

    /// Host context for one task attempt.
    pub fn context(&self, partition: u32, attempt: u32) -> ShardContext {
        ShardContext {
            task: TaskAttemptId::new("job_e2e", partition, attempt),
            output_root: self.output_root.clone(),
            staged_dirs: self.staged_dirs.clone(),
            reporter: self.reporter.clone(),
        }
    }

    /// Open a writer for `partition` with the harness settings.
    pub async fn open_writer(&self, partition: u32) -> Result<ShardWriter, ShardWriterError> {
        ShardWriter::open(self.settings(), self.context(partition, 0)).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema staged in the harness bundle.
pub fn test_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("id", STRING | STORED);
    builder.add_text_field("title", TEXT | STORED);
    builder.add_text_field("body", TEXT);
    builder.build()
}

/// Record value for document `i`. The key is left out so the writer fills it.
pub fn test_record(i: usize) -> Value {
    json!({
        "title": format!("record number {}", i),
        "body": "bulk indexing output stage",
    })
}

/// Write `count` records keyed `doc-<i>`.
pub async fn write_records(writer: &ShardWriter, count: usize) -> Result<(), ShardWriterError> {
    for i in 0..count {
        writer.write(&format!("doc-{}", i), test_record(i)).await?;
    }
    Ok(())
}

/// Open the finished shard's index.
pub fn open_shard(shard_dir: &Path) -> Index {
    Index::open_in_dir(shard_dir.join(shard_index::DATA_DIR_NAME)).expect("Failed to open shard")
}

/// Number of searchable documents in a finished shard.
pub fn shard_doc_count(shard_dir: &Path) -> u64 {
    let reader = open_shard(shard_dir).reader().expect("Failed to open reader");
    reader.searcher().num_docs()
}

/// Stored `id` values of documents matching `query` in the `title` field.
pub fn search_ids(shard_dir: &Path, query: &str, limit: usize) -> Vec<String> {
    let index = open_shard(shard_dir);
    let schema = index.schema();
    let title = schema.get_field("title").expect("title field");
    let id = schema.get_field("id").expect("id field");

    let reader = index.reader().expect("Failed to open reader");
    let searcher = reader.searcher();
    let query = QueryParser::for_index(&index, vec![title])
        .parse_query(query)
        .expect("Failed to parse query");
    let hits = searcher
        .search(&query, &TopDocs::with_limit(limit))
        .expect("Search failed");

    hits.into_iter()
        .filter_map(|(_, address)| {
            let doc: TantivyDocument = searcher.doc(address).ok()?;
            doc.get_first(id)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect()
}
