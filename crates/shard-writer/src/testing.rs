//! In-memory index service for testing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use shard_index::{Document, IndexService, IndexServiceError};

/// Latch that blocks batch submissions until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        *open = true;
        self.opened.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// Mock index service that records what it receives.
///
/// Can be told to reject a given submission, to take a fixed time per batch,
/// or to hold every batch until a [`Gate`] opens.
#[derive(Default)]
pub struct MockIndexService {
    batches: Mutex<Vec<(Instant, Vec<Document>)>>,
    fail_on: Option<u64>,
    delay: Option<Duration>,
    gate: Option<Arc<Gate>>,
    unique_key: Option<String>,
    rejected_field: Option<String>,
    add_calls: AtomicU64,
    commit_calls: AtomicU64,
    optimize_calls: AtomicU64,
    close_calls: AtomicU64,
    abort_calls: AtomicU64,
    fail_commit: AtomicBool,
    fail_optimize: AtomicBool,
}

impl MockIndexService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `n`th submission (0-based).
    pub fn fail_on_call(mut self, n: u64) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Sleep this long inside every submission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_unique_key(mut self, field: impl Into<String>) -> Self {
        self.unique_key = Some(field.into());
        self
    }

    /// Fail validation of any document carrying `field`.
    pub fn rejecting_field(mut self, field: impl Into<String>) -> Self {
        self.rejected_field = Some(field.into());
        self
    }

    /// Make the next commit fail.
    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next optimize fail.
    pub fn fail_optimize(&self) {
        self.fail_optimize.store(true, Ordering::SeqCst);
    }

    /// Accepted batches in completion order.
    pub fn batches(&self) -> Vec<Vec<Document>> {
        self.lock_batches().iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock_batches().iter().map(|(_, b)| b.len()).collect()
    }

    /// When each accepted batch finished.
    pub fn completion_times(&self) -> Vec<Instant> {
        self.lock_batches().iter().map(|(t, _)| *t).collect()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn add_calls(&self) -> u64 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> u64 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn optimize_calls(&self) -> u64 {
        self.optimize_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> u64 {
        self.abort_calls.load(Ordering::SeqCst)
    }

    fn lock_batches(&self) -> std::sync::MutexGuard<'_, Vec<(Instant, Vec<Document>)>> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl IndexService for MockIndexService {
    fn add_batch(&self, batch: Vec<Document>) -> Result<(), IndexServiceError> {
        let call = self.add_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on == Some(call) {
            return Err(IndexServiceError::Rejected(format!(
                "mock rejected submission {}",
                call
            )));
        }

        self.lock_batches().push((Instant::now(), batch));
        Ok(())
    }

    fn commit(&self) -> Result<(), IndexServiceError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(IndexServiceError::Rejected("mock commit failure".into()));
        }
        Ok(())
    }

    fn optimize(&self) -> Result<(), IndexServiceError> {
        self.optimize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_optimize.swap(false, Ordering::SeqCst) {
            return Err(IndexServiceError::Rejected("mock optimize failure".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), IndexServiceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self) -> Result<(), IndexServiceError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn validate(&self, doc: &Document) -> Result<(), IndexServiceError> {
        match &self.rejected_field {
            Some(field) if doc.contains_field(field) => Err(IndexServiceError::DocumentParse(
                format!("mock rejects field {}", field),
            )),
            _ => Ok(()),
        }
    }

    fn unique_key_field(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }
}
