//! Index service error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while provisioning or writing to an index service.
#[derive(Debug, Error)]
pub enum IndexServiceError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration root is unset or incomplete
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// The shard data directory could not be created
    #[error("Unable to create {}: {source}", path.display())]
    StorageInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bundle schema could not be parsed
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Existing index does not match the bundle schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Value is not a document (not a JSON object)
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Document does not fit the schema
    #[error("Document parse error: {0}")]
    DocumentParse(String),

    /// Writer mutex was poisoned
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Service has already been closed or aborted
    #[error("Index service is closed")]
    Closed,

    /// Engine refused a batch for any other reason
    #[error("Batch rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for IndexServiceError {
    fn from(err: serde_json::Error) -> Self {
        IndexServiceError::InvalidDocument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexServiceError::MissingConfiguration("no conf".to_string());
        assert_eq!(err.to_string(), "Missing configuration: no conf");

        let err = IndexServiceError::StorageInit {
            path: PathBuf::from("/shard/data"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Unable to create /shard/data: denied");

        assert_eq!(IndexServiceError::Closed.to_string(), "Index service is closed");
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: IndexServiceError = json_err.into();
        assert!(matches!(err, IndexServiceError::InvalidDocument(_)));
    }
}
