//! Host framework interface: task identity, shard naming and reporting.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

/// Counter group used for everything the shard writer counts.
pub const COUNTER_GROUP: &str = "ShardWriter";

/// Identity of one task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskAttemptId {
    /// Job name
    pub job: String,
    /// Partition (task) number within the job
    pub partition: u32,
    /// Attempt number of this task
    pub attempt: u32,
}

impl TaskAttemptId {
    pub fn new(job: impl Into<String>, partition: u32, attempt: u32) -> Self {
        Self {
            job: job.into(),
            partition,
            attempt,
        }
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:07}_{}", self.job, self.partition, self.attempt)
    }
}

/// Shard directory name: `<prefix>-<partition:07>-<attempt:03>`.
pub fn shard_output_name(prefix: &str, task: &TaskAttemptId) -> String {
    format!("{}-{:07}-{:03}", prefix, task.partition, task.attempt)
}

/// Shard directory under the job's output root.
pub fn shard_output_dir(output_root: &Path, prefix: &str, task: &TaskAttemptId) -> PathBuf {
    output_root.join(shard_output_name(prefix, task))
}

/// A liveness report could not be delivered.
#[derive(Debug, Error)]
#[error("Progress report failed: {0}")]
pub struct ReportError(pub String);

/// Progress, status and counter reporting back to the host framework.
///
/// Passed explicitly to every component that reports.
pub trait TaskReporter: Send + Sync {
    /// Tell the host scheduler the task is alive.
    fn progress(&self) -> Result<(), ReportError>;

    /// Set the human-readable task status.
    fn set_status(&self, status: &str);

    /// Add `amount` to a named counter.
    fn increment_counter(&self, task: &TaskAttemptId, group: &str, name: &str, amount: u64);
}

/// Reporter that logs and keeps counters in memory.
///
/// Used by the ingest binary and in tests.
#[derive(Debug, Default)]
pub struct LoggingReporter {
    progress_calls: AtomicU64,
    status: Mutex<Option<String>>,
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl LoggingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of progress reports received.
    pub fn progress_calls(&self) -> u64 {
        self.progress_calls.load(Ordering::SeqCst)
    }

    /// Most recent status.
    pub fn status(&self) -> Option<String> {
        self.status.lock().ok().and_then(|s| s.clone())
    }

    /// Current value of a counter, 0 if never incremented.
    pub fn counter(&self, group: &str, name: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(&(group.to_string(), name.to_string())).copied())
            .unwrap_or(0)
    }

    /// Snapshot of all counters, sorted by group then name.
    pub fn counters(&self) -> Vec<(String, String, u64)> {
        let mut all: Vec<_> = self
            .counters
            .lock()
            .map(|c| {
                c.iter()
                    .map(|((group, name), value)| (group.clone(), name.clone(), *value))
                    .collect()
            })
            .unwrap_or_default();
        all.sort();
        all
    }
}

impl TaskReporter for LoggingReporter {
    fn progress(&self) -> Result<(), ReportError> {
        let calls = self.progress_calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(calls, "Task progress");
        Ok(())
    }

    fn set_status(&self, status: &str) {
        info!(status, "Task status");
        if let Ok(mut current) = self.status.lock() {
            *current = Some(status.to_string());
        }
    }

    fn increment_counter(&self, task: &TaskAttemptId, group: &str, name: &str, amount: u64) {
        debug!(task = %task, group, name, amount, "Counter increment");
        if let Ok(mut counters) = self.counters.lock() {
            *counters
                .entry((group.to_string(), name.to_string()))
                .or_insert(0) += amount;
        }
    }
}
