//! Output stage of a distributed bulk-indexing job.
//!
//! Each task attempt owns one [`ShardWriter`]. It finds the configuration
//! bundle staged by the distributed cache, provisions an embedded index in its
//! own shard directory, and streams records into it through a batching,
//! multi-worker sink. Long operations run under liveness protection so the
//! host scheduler does not kill the task for going silent.
//!
//! # Features
//!
//! - Bundle resolution by exact name among staged directories
//! - Bounded worker queue with backpressure and an enqueue timeout
//! - Fail-fast pipeline: the first rejected batch fails every later operation
//! - Nested RAII liveness guards sharing one reporting session
//! - Staged close with status and counter reporting
//!
//! # Example
//!
//! ```ignore
//! use shard_writer::{ShardContext, ShardWriter, ShardWriterSettings, TaskAttemptId};
//!
//! let settings = ShardWriterSettings::load(None)?;
//! let writer = ShardWriter::open(settings, ShardContext {
//!     task: TaskAttemptId::new("job_42", 3, 0),
//!     output_root: "/jobs/42/index".into(),
//!     staged_dirs,
//!     reporter,
//! }).await?;
//!
//! writer.write("doc-1", serde_json::json!({"title": "hello"})).await?;
//! writer.close(None).await?;
//! ```

pub mod config;
pub mod error;
pub mod liveness;
pub mod resolver;
pub mod sink;
pub mod task;
pub mod testing;
pub mod writer;

pub use config::ShardWriterSettings;
pub use error::ShardWriterError;
pub use liveness::{LivenessGuard, LivenessReporter};
pub use resolver::{find_config_bundle, ALLOWED_BUNDLE_DIRS, REQUIRED_BUNDLE_DIRS};
pub use sink::{BatchSink, BatchSinkConfig, IndexWriteTask};
pub use task::{
    shard_output_dir, shard_output_name, LoggingReporter, ReportError, TaskAttemptId,
    TaskReporter, COUNTER_GROUP,
};
pub use writer::{LifecycleState, ShardContext, ShardWriter};
