//! Index service: the boundary between the batch pipeline and the engine.
//!
//! [`EmbeddedIndexService`] wraps a single Tantivy `IndexWriter` behind a
//! mutex. Every batch is added while holding the lock, so submissions from
//! different workers never interleave inside the writer; Tantivy spreads the
//! actual indexing over its own threads.

use std::sync::Mutex;

use tantivy::{Index, IndexWriter, Term};
use tracing::{debug, info, warn};

use crate::document::{to_tantivy_doc, Document};
use crate::error::IndexServiceError;
use crate::factory::InstanceProperties;
use crate::schema::ShardSchema;

/// Operations the batch pipeline needs from an index engine.
///
/// Implementations must be safe to call from several worker threads. Calls
/// may block for a long time.
pub trait IndexService: Send + Sync {
    /// Submit one batch. Documents are added in slice order.
    fn add_batch(&self, batch: Vec<Document>) -> Result<(), IndexServiceError>;

    /// Make all submitted documents durable.
    fn commit(&self) -> Result<(), IndexServiceError>;

    /// Merge the index down to as few segments as possible.
    fn optimize(&self) -> Result<(), IndexServiceError> {
        Ok(())
    }

    /// Release the engine after a successful run.
    fn close(&self) -> Result<(), IndexServiceError>;

    /// Discard uncommitted documents and release the engine.
    fn abort(&self) -> Result<(), IndexServiceError>;

    /// Check that `doc` fits the engine's schema without submitting it.
    fn validate(&self, _doc: &Document) -> Result<(), IndexServiceError> {
        Ok(())
    }

    /// Field that should carry the record key, if the engine has one.
    fn unique_key_field(&self) -> Option<&str> {
        None
    }
}

/// Embedded Tantivy service bound to one shard data directory.
pub struct EmbeddedIndexService {
    index: Index,
    schema: ShardSchema,
    writer: Mutex<Option<IndexWriter>>,
    properties: InstanceProperties,
}

impl EmbeddedIndexService {
    pub(crate) fn new(
        index: Index,
        schema: ShardSchema,
        writer: IndexWriter,
        properties: InstanceProperties,
    ) -> Self {
        Self {
            index,
            schema,
            writer: Mutex::new(Some(writer)),
            properties,
        }
    }

    /// Instance properties the service was built with.
    pub fn properties(&self) -> &InstanceProperties {
        &self.properties
    }

    /// Get the underlying Tantivy index
    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn schema(&self) -> &ShardSchema {
        &self.schema
    }

    /// Whether the writer has been released by close or abort.
    pub fn is_closed(&self) -> bool {
        self.writer.lock().map(|w| w.is_none()).unwrap_or(true)
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> Result<T, IndexServiceError>,
    ) -> Result<T, IndexServiceError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|e| IndexServiceError::IndexLocked(e.to_string()))?;
        let writer = guard.as_mut().ok_or(IndexServiceError::Closed)?;
        f(writer)
    }

    fn take_writer(&self) -> Result<IndexWriter, IndexServiceError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|e| IndexServiceError::IndexLocked(e.to_string()))?;
        guard.take().ok_or(IndexServiceError::Closed)
    }
}

impl IndexService for EmbeddedIndexService {
    fn add_batch(&self, batch: Vec<Document>) -> Result<(), IndexServiceError> {
        // Convert outside the lock; a bad document fails the whole batch.
        let docs = batch
            .iter()
            .map(|doc| to_tantivy_doc(&self.schema, doc))
            .collect::<Result<Vec<_>, _>>()?;

        self.with_writer(|writer| {
            for (source, doc) in batch.iter().zip(docs) {
                // Replace an earlier document with the same key
                if let (Some(field), Some(key)) = (
                    self.schema.unique_key,
                    self.schema
                        .unique_key_name()
                        .and_then(|name| source.get(name))
                        .and_then(|v| v.as_str()),
                ) {
                    writer.delete_term(Term::from_field_text(field, key));
                }
                writer.add_document(doc)?;
            }
            Ok(())
        })?;

        debug!(core = %self.properties.core_name, count = batch.len(), "Added batch");
        Ok(())
    }

    fn commit(&self) -> Result<(), IndexServiceError> {
        let opstamp = self.with_writer(|writer| Ok(writer.commit()?))?;
        info!(core = %self.properties.core_name, opstamp, "Committed index changes");
        Ok(())
    }

    fn optimize(&self) -> Result<(), IndexServiceError> {
        let segment_ids = self.index.searchable_segment_ids()?;
        if segment_ids.len() < 2 {
            debug!(segments = segment_ids.len(), "Nothing to merge");
            return Ok(());
        }

        let merged = self.with_writer(|writer| Ok(writer.merge(&segment_ids).wait()?))?;
        info!(
            core = %self.properties.core_name,
            from_segments = segment_ids.len(),
            merged = merged.is_some(),
            "Merged index segments"
        );
        Ok(())
    }

    fn close(&self) -> Result<(), IndexServiceError> {
        let writer = self.take_writer()?;
        writer.wait_merging_threads()?;
        info!(
            core = %self.properties.core_name,
            data_dir = ?self.properties.data_dir,
            "Closed index service"
        );
        Ok(())
    }

    fn abort(&self) -> Result<(), IndexServiceError> {
        let mut writer = self.take_writer()?;
        let opstamp = writer.rollback()?;
        warn!(core = %self.properties.core_name, opstamp, "Rolled back index changes");
        writer.wait_merging_threads()?;
        Ok(())
    }

    fn validate(&self, doc: &Document) -> Result<(), IndexServiceError> {
        to_tantivy_doc(&self.schema, doc).map(|_| ())
    }

    fn unique_key_field(&self) -> Option<&str> {
        self.schema.unique_key_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_index_service;
    use crate::schema::SCHEMA_FILE_NAME;
    use tantivy::schema::{Schema, STORED, STRING, TEXT};
    use tempfile::TempDir;

    fn bundle(temp_dir: &TempDir) -> std::path::PathBuf {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("body", TEXT);
        let conf = temp_dir.path().join("bundle").join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(
            conf.join(SCHEMA_FILE_NAME),
            serde_json::to_string(&builder.build()).unwrap(),
        )
        .unwrap();
        temp_dir.path().join("bundle")
    }

    fn num_docs(service: &EmbeddedIndexService) -> u64 {
        let reader = service.index().reader().unwrap();
        reader
            .searcher()
            .segment_readers()
            .iter()
            .map(|r| r.num_docs() as u64)
            .sum()
    }

    fn doc(id: &str) -> Document {
        Document::new()
            .with_field("id", id)
            .with_field("body", "shard body text")
    }

    #[test]
    fn test_add_batch_and_commit() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        service.add_batch(vec![doc("a"), doc("b"), doc("c")]).unwrap();
        service.commit().unwrap();

        assert_eq!(num_docs(&service), 3);
    }

    #[test]
    fn test_same_key_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        service.add_batch(vec![doc("a")]).unwrap();
        service.commit().unwrap();
        service.add_batch(vec![doc("a")]).unwrap();
        service.commit().unwrap();

        assert_eq!(num_docs(&service), 1);
    }

    #[test]
    fn test_bad_document_rejects_batch() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        let bad = Document::new().with_field("id", serde_json::json!({"x": 1}));
        let result = service.add_batch(vec![doc("a"), bad]);
        assert!(matches!(result, Err(IndexServiceError::DocumentParse(_))));

        service.commit().unwrap();
        assert_eq!(num_docs(&service), 0);
    }

    #[test]
    fn test_validate_checks_schema_types() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        assert!(service.validate(&doc("a")).is_ok());
        let bad = Document::new().with_field("id", serde_json::json!({"x": 1}));
        assert!(matches!(
            service.validate(&bad),
            Err(IndexServiceError::DocumentParse(_))
        ));

        // Nothing reached the writer
        service.commit().unwrap();
        assert_eq!(num_docs(&service), 0);
    }

    #[test]
    fn test_optimize_and_close() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        for i in 0..3 {
            service.add_batch(vec![doc(&format!("doc-{}", i))]).unwrap();
            service.commit().unwrap();
        }
        service.optimize().unwrap();
        service.close().unwrap();

        assert!(service.is_closed());
        assert_eq!(num_docs(&service), 3);
    }

    #[test]
    fn test_close_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        service.close().unwrap();
        assert!(matches!(service.close(), Err(IndexServiceError::Closed)));
        assert!(matches!(
            service.add_batch(vec![doc("a")]),
            Err(IndexServiceError::Closed)
        ));
    }

    #[test]
    fn test_abort_discards_uncommitted() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        service.add_batch(vec![doc("a"), doc("b")]).unwrap();
        service.abort().unwrap();

        assert!(service.is_closed());
        assert_eq!(num_docs(&service), 0);
    }

    #[test]
    fn test_unique_key_field() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            create_index_service(Some(&bundle(&temp_dir)), &temp_dir.path().join("shard"), 15)
                .unwrap();

        assert_eq!(service.unique_key_field(), Some("id"));
    }
}
