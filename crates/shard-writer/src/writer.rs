//! The shard writer: one per task attempt.
//!
//! Lifecycle is `Open -> Closing -> Closed`, one way only. Writes are accepted
//! while `Open`; `close` is accepted once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;
use shard_index::{create_index_service, Document, IndexService, IndexServiceError};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::ShardWriterSettings;
use crate::error::ShardWriterError;
use crate::liveness::LivenessReporter;
use crate::resolver::find_config_bundle;
use crate::sink::{BatchSink, BatchSinkConfig};
use crate::task::{shard_output_dir, TaskAttemptId, TaskReporter};

/// Writer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// What the host hands a task when it starts.
#[derive(Clone)]
pub struct ShardContext {
    pub task: TaskAttemptId,
    /// Job output root; the shard directory is created below it
    pub output_root: PathBuf,
    /// Directories staged by the distributed cache
    pub staged_dirs: Vec<PathBuf>,
    pub reporter: Arc<dyn TaskReporter>,
}

/// Writes one task's records into its own index shard.
pub struct ShardWriter {
    task: TaskAttemptId,
    state: AtomicU8,
    sink: Mutex<BatchSink>,
    liveness: LivenessReporter,
    reporter: Arc<dyn TaskReporter>,
    service: Arc<dyn IndexService>,
    unique_key: Option<String>,
    output_dir: Option<PathBuf>,
}

impl ShardWriter {
    /// Resolve the bundle, provision the embedded index and start the sink.
    ///
    /// Runs under liveness protection. Any failure is `InitFailed` naming the
    /// task; the caller should abort the task rather than retry.
    pub async fn open(
        settings: ShardWriterSettings,
        ctx: ShardContext,
    ) -> Result<Self, ShardWriterError> {
        let task = ctx.task.clone();
        Self::try_open(settings, ctx).await.map_err(|e| {
            error!(task = %task, error = %e, "Shard writer initialization failed");
            ShardWriterError::InitFailed {
                task: task.to_string(),
                source: Box::new(e),
            }
        })
    }

    async fn try_open(
        settings: ShardWriterSettings,
        ctx: ShardContext,
    ) -> Result<Self, ShardWriterError> {
        settings.validate()?;
        let ShardContext {
            task,
            output_root,
            staged_dirs,
            reporter,
        } = ctx;

        let liveness =
            LivenessReporter::new(task.clone(), reporter.clone(), settings.liveness_interval());
        let _guard = liveness.start_protecting();

        let bundle = find_config_bundle(&staged_dirs, &settings.bundle_name)?;
        let output_dir = shard_output_dir(&output_root, &settings.output_prefix, &task);
        info!(task = %task, output_dir = ?output_dir, "Opening shard");

        let memory_mb = settings.writer_memory_mb;
        let service = {
            let bundle = bundle.clone();
            let output_dir = output_dir.clone();
            tokio::task::spawn_blocking(move || {
                create_index_service(Some(&bundle), &output_dir, memory_mb)
            })
            .await
            .map_err(|e| IndexServiceError::Io(std::io::Error::other(e.to_string())))??
        };

        let mut writer = Self::assemble(&settings, task, reporter, liveness.clone(), Arc::new(service));
        writer.output_dir = Some(output_dir);
        Ok(writer)
    }

    /// Build a writer over an already constructed index service.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_service(
        settings: &ShardWriterSettings,
        task: TaskAttemptId,
        reporter: Arc<dyn TaskReporter>,
        service: Arc<dyn IndexService>,
    ) -> Result<Self, ShardWriterError> {
        settings.validate()?;
        let liveness =
            LivenessReporter::new(task.clone(), reporter.clone(), settings.liveness_interval());
        Ok(Self::assemble(settings, task, reporter, liveness, service))
    }

    fn assemble(
        settings: &ShardWriterSettings,
        task: TaskAttemptId,
        reporter: Arc<dyn TaskReporter>,
        liveness: LivenessReporter,
        service: Arc<dyn IndexService>,
    ) -> Self {
        let unique_key = service.unique_key_field().map(str::to_string);
        let sink = BatchSink::new(
            task.clone(),
            BatchSinkConfig::from_settings(settings),
            service.clone(),
            reporter.clone(),
        );
        debug!(
            task = %task,
            liveness_interval_secs = liveness.interval().as_secs(),
            "Shard writer assembled"
        );

        Self {
            task,
            state: AtomicU8::new(LifecycleState::Open as u8),
            sink: Mutex::new(sink),
            liveness,
            reporter,
            service,
            unique_key,
            output_dir: None,
        }
    }

    /// Write one record.
    ///
    /// `value` must be a JSON object whose fields fit the index schema. When
    /// it lacks the unique key field the key is stored there. A rejected
    /// record fails alone and leaves the writer usable.
    pub async fn write(&self, key: &str, value: Value) -> Result<(), ShardWriterError> {
        if self.state() != LifecycleState::Open {
            return Err(ShardWriterError::AlreadyClosing);
        }

        let mut doc = Document::from_value(value)?;
        if let Some(field) = &self.unique_key {
            if !doc.contains_field(field) {
                doc.insert(field.as_str(), key);
            }
        }
        self.service
            .validate(&doc)
            .map_err(|e| ShardWriterError::InvalidRecord(format!("{}: {}", key, e)))?;

        let _guard = self.liveness.start_protecting();
        let mut sink = self.sink.lock().await;
        // Close may have started while waiting for the sink
        if self.state() != LifecycleState::Open {
            return Err(ShardWriterError::AlreadyClosing);
        }
        sink.enqueue(doc).await
    }

    /// Flush everything written so far and close the index.
    ///
    /// `context` replaces the reporter used for liveness and close progress.
    /// Failures come back as `CloseFailed` wrapping the cause.
    pub async fn close(
        &self,
        context: Option<Arc<dyn TaskReporter>>,
    ) -> Result<(), ShardWriterError> {
        self.state
            .compare_exchange(
                LifecycleState::Open as u8,
                LifecycleState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| ShardWriterError::AlreadyClosing)?;
        info!(task = %self.task, "Closing shard writer");

        let progress = match context {
            Some(reporter) => {
                self.liveness.set_reporter(reporter.clone());
                reporter
            }
            None => self.reporter.clone(),
        };
        progress.set_status("Flushing");

        let result = {
            let _guard = self.liveness.start_protecting();
            let mut sink = self.sink.lock().await;
            sink.flush_and_close(progress.as_ref()).await
        };
        self.state
            .store(LifecycleState::Closed as u8, Ordering::SeqCst);

        match result {
            Ok(()) => {
                progress.set_status("Done");
                info!(task = %self.task, "Shard writer closed");
                Ok(())
            }
            Err(e) => {
                error!(task = %self.task, error = %e, "Shard writer close failed");
                Err(ShardWriterError::CloseFailed(Box::new(e)))
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn task(&self) -> &TaskAttemptId {
        &self.task
    }

    /// Shard directory, when the writer provisioned its own index.
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn liveness(&self) -> &LivenessReporter {
        &self.liveness
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Open {
            debug!(task = %self.task, "Shard writer dropped without close");
        }
    }
}
