//! Error types for the shard writer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shard_index::IndexServiceError;
use thiserror::Error;

/// Errors surfaced to the host framework.
#[derive(Debug, Error)]
pub enum ShardWriterError {
    /// No staged bundle matches, or the bundle is incomplete
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Shard data directory could not be created
    #[error("Unable to create {}: {source}", path.display())]
    StorageInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Write attempted after close began
    #[error("Index is already closing")]
    AlreadyClosing,

    /// Record value is not a document
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A worker's batch was rejected; the pipeline is poisoned
    #[error("Batch {batch} was rejected by the index service: {source}")]
    SubmissionFailure {
        batch: u64,
        #[source]
        source: Arc<IndexServiceError>,
    },

    /// Waiting for writer tasks was interrupted
    #[error("Interrupted while draining writer tasks: {0}")]
    InterruptedDuringDrain(String),

    /// Writer queue stayed full past the enqueue timeout
    #[error("Writer queue stayed full for {waited:?}")]
    BackpressureTimeout { waited: Duration },

    /// Sink no longer accepts work
    #[error("Batch sink is closed")]
    SinkClosed,

    /// Close failed; wraps the underlying cause
    #[error("Failed to close shard writer: {0}")]
    CloseFailed(#[source] Box<ShardWriterError>),

    /// Construction failed; the worker must abort
    #[error("Failed to initialize shard writer for {task}: {source}")]
    InitFailed {
        task: String,
        #[source]
        source: Box<ShardWriterError>,
    },

    /// Settings could not be loaded or are invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other index engine error
    #[error("Index service error: {0}")]
    Service(#[source] IndexServiceError),
}

impl ShardWriterError {
    /// The original cause when the pipeline has been poisoned by a worker.
    pub fn submission_cause(&self) -> Option<&IndexServiceError> {
        match self {
            ShardWriterError::SubmissionFailure { source, .. } => Some(source.as_ref()),
            ShardWriterError::CloseFailed(inner) => inner.submission_cause(),
            _ => None,
        }
    }
}

impl From<IndexServiceError> for ShardWriterError {
    fn from(err: IndexServiceError) -> Self {
        match err {
            IndexServiceError::MissingConfiguration(msg) => {
                ShardWriterError::MissingConfiguration(msg)
            }
            IndexServiceError::StorageInit { path, source } => {
                ShardWriterError::StorageInit { path, source }
            }
            IndexServiceError::InvalidDocument(msg) => ShardWriterError::InvalidRecord(msg),
            other => ShardWriterError::Service(other),
        }
    }
}

impl From<config::ConfigError> for ShardWriterError {
    fn from(err: config::ConfigError) -> Self {
        ShardWriterError::Config(err.to_string())
    }
}
