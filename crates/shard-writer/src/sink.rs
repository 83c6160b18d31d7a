//! Batching producer/consumer pipeline in front of the index service.
//!
//! Documents are collected into batches on the caller's side. Full batches
//! go through a bounded queue to a fixed pool of writer workers, and each
//! worker hands one batch at a time to the index service on the blocking
//! thread pool. A full queue blocks the caller.
//!
//! The first rejected batch poisons the sink: workers stop dispatching to the
//! engine and every later operation fails with the original cause.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use shard_index::{Document, IndexService, IndexServiceError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ShardWriterSettings;
use crate::error::ShardWriterError;
use crate::task::{TaskAttemptId, TaskReporter, COUNTER_GROUP};

/// Tuning for a [`BatchSink`].
#[derive(Debug, Clone)]
pub struct BatchSinkConfig {
    /// Documents per batch
    pub batch_size: usize,
    /// Number of writer workers
    pub writer_threads: usize,
    /// Queued batches before enqueue blocks
    pub queue_size: usize,
    /// Longest time enqueue may block on a full queue
    pub enqueue_timeout: Duration,
    /// Progress report interval while draining
    pub drain_progress_interval: Duration,
    /// Merge segments before closing the service
    pub optimize: bool,
}

impl Default for BatchSinkConfig {
    fn default() -> Self {
        Self::from_settings(&ShardWriterSettings::default())
    }
}

impl BatchSinkConfig {
    pub fn from_settings(settings: &ShardWriterSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            writer_threads: settings.writer_threads.max(1),
            queue_size: settings.writer_queue_size.max(1),
            enqueue_timeout: settings.enqueue_timeout(),
            drain_progress_interval: settings.drain_progress_interval(),
            optimize: settings.optimize,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads.max(1);
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

/// One batch on its way to a worker.
#[derive(Debug)]
pub struct IndexWriteTask {
    /// Dispatch order, starting at 0
    pub sequence: u64,
    /// Documents in enqueue order
    pub batch: Vec<Document>,
}

/// First worker failure, shared between workers and the sink.
#[derive(Default)]
struct FailureSlot {
    first: Mutex<Option<(u64, Arc<IndexServiceError>)>>,
}

impl FailureSlot {
    fn record(&self, batch: u64, err: IndexServiceError) {
        let mut first = self.first.lock().unwrap_or_else(|p| p.into_inner());
        // Later failures are consequences of the first
        if first.is_none() {
            *first = Some((batch, Arc::new(err)));
        }
    }

    fn is_set(&self) -> bool {
        self.first
            .lock()
            .map(|f| f.is_some())
            .unwrap_or(true)
    }

    fn check(&self) -> Result<(), ShardWriterError> {
        let first = self.first.lock().unwrap_or_else(|p| p.into_inner());
        match first.as_ref() {
            Some((batch, source)) => Err(ShardWriterError::SubmissionFailure {
                batch: *batch,
                source: source.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// State shared by every worker.
struct WorkerContext {
    task: TaskAttemptId,
    service: Arc<dyn IndexService>,
    reporter: Arc<dyn TaskReporter>,
    failure: Arc<FailureSlot>,
}

/// Batching sink feeding a pool of index writer workers.
pub struct BatchSink {
    task: TaskAttemptId,
    config: BatchSinkConfig,
    service: Arc<dyn IndexService>,
    reporter: Arc<dyn TaskReporter>,
    current: Vec<Document>,
    sender: Option<mpsc::Sender<IndexWriteTask>>,
    workers: JoinSet<()>,
    failure: Arc<FailureSlot>,
    stalled: Option<Duration>,
    next_sequence: u64,
    closed: bool,
}

impl BatchSink {
    /// Create the sink and start its workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        task: TaskAttemptId,
        config: BatchSinkConfig,
        service: Arc<dyn IndexService>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let failure = Arc::new(FailureSlot::default());

        let context = Arc::new(WorkerContext {
            task: task.clone(),
            service: service.clone(),
            reporter: reporter.clone(),
            failure: failure.clone(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..config.writer_threads {
            workers.spawn(run_worker(worker_id, receiver.clone(), context.clone()));
        }

        info!(
            task = %task,
            batch_size = config.batch_size,
            workers = config.writer_threads,
            queue_size = config.queue_size,
            "Started batch sink"
        );

        Self {
            task,
            current: Vec::with_capacity(config.batch_size),
            config,
            service,
            reporter,
            sender: Some(sender),
            workers,
            failure,
            stalled: None,
            next_sequence: 0,
            closed: false,
        }
    }

    /// Add one document to the current batch, dispatching it when full.
    ///
    /// Blocks while the worker queue is full, up to the enqueue timeout.
    pub async fn enqueue(&mut self, doc: Document) -> Result<(), ShardWriterError> {
        self.check_usable()?;

        self.current.push(doc);
        if self.current.len() >= self.config.batch_size {
            let batch = std::mem::replace(
                &mut self.current,
                Vec::with_capacity(self.config.batch_size),
            );
            self.dispatch(batch).await?;
        }
        Ok(())
    }

    /// Dispatch the partial batch, wait for every task, then close the service.
    ///
    /// Reports progress to `progress` while waiting. The service is closed
    /// exactly once: committed on success, rolled back after a failure.
    pub async fn flush_and_close(
        &mut self,
        progress: &dyn TaskReporter,
    ) -> Result<(), ShardWriterError> {
        if self.closed {
            return Err(ShardWriterError::SinkClosed);
        }

        let drained = self.drain(progress).await;
        self.closed = true;

        if let Err(e) = drained {
            error!(task = %self.task, error = %e, "Batch sink failed; rolling back");
            self.rollback().await;
            return Err(e);
        }

        // A failed service step leaves the writer held; release it by rollback
        if let Err(e) = self.finish_service(progress).await {
            error!(task = %self.task, error = %e, "Closing the index failed; rolling back");
            self.rollback().await;
            return Err(e);
        }
        info!(task = %self.task, batches = self.next_sequence, "Batch sink closed");
        Ok(())
    }

    /// Batches dispatched to the worker queue so far.
    pub fn batches_dispatched(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_usable(&self) -> Result<(), ShardWriterError> {
        self.failure.check()?;
        if let Some(waited) = self.stalled {
            return Err(ShardWriterError::BackpressureTimeout { waited });
        }
        if self.closed || self.sender.is_none() {
            return Err(ShardWriterError::SinkClosed);
        }
        Ok(())
    }

    async fn dispatch(&mut self, batch: Vec<Document>) -> Result<(), ShardWriterError> {
        let sender = self.sender.as_ref().ok_or(ShardWriterError::SinkClosed)?;
        let sequence = self.next_sequence;
        let size = batch.len();
        let task = IndexWriteTask { sequence, batch };

        let sent = tokio::time::timeout(self.config.enqueue_timeout, sender.send(task)).await;
        match sent {
            Ok(Ok(())) => {
                self.next_sequence += 1;
                debug!(task = %self.task, batch = sequence, size, "Queued batch");
                Ok(())
            }
            // Receivers only go away when every worker has stopped
            Ok(Err(_)) => Err(ShardWriterError::SinkClosed),
            Err(_) => {
                let waited = self.config.enqueue_timeout;
                error!(
                    task = %self.task,
                    batch = sequence,
                    waited_secs = waited.as_secs(),
                    "Writer queue stayed full"
                );
                self.stalled = Some(waited);
                Err(ShardWriterError::BackpressureTimeout { waited })
            }
        }
    }

    async fn drain(&mut self, progress: &dyn TaskReporter) -> Result<(), ShardWriterError> {
        let mut dispatched = Ok(());
        if !self.current.is_empty() {
            let batch = std::mem::take(&mut self.current);
            if self.check_usable().is_ok() {
                dispatched = self.dispatch(batch).await;
            } else {
                debug!(task = %self.task, dropped = batch.len(), "Discarding partial batch");
            }
        }

        // No more tasks; workers exit once the queue is empty
        drop(self.sender.take());
        info!(
            task = %self.task,
            batches = self.next_sequence,
            "Waiting for writer workers"
        );

        let mut ticker = tokio::time::interval(self.config.drain_progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut interrupted = None;

        loop {
            tokio::select! {
                joined = self.workers.join_next() => match joined {
                    None => break,
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        error!(task = %self.task, error = %e, "Writer worker did not finish");
                        interrupted.get_or_insert_with(|| e.to_string());
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = progress.progress() {
                        warn!(task = %self.task, error = %e, "Progress report failed while draining");
                    }
                }
            }
        }

        if let Some(msg) = interrupted {
            return Err(ShardWriterError::InterruptedDuringDrain(msg));
        }
        // The first rejected batch is the root cause of anything that follows
        self.failure.check()?;
        if let Some(waited) = self.stalled {
            return Err(ShardWriterError::BackpressureTimeout { waited });
        }
        dispatched
    }

    async fn finish_service(&self, progress: &dyn TaskReporter) -> Result<(), ShardWriterError> {
        progress.set_status("Committing");
        self.timed_service_call("commit_millis", |s| s.commit()).await?;

        if self.config.optimize {
            progress.set_status("Optimizing");
            self.timed_service_call("optimize_millis", |s| s.optimize())
                .await?;
        }

        progress.set_status("Closing index");
        self.timed_service_call("close_millis", |s| s.close()).await
    }

    async fn rollback(&self) {
        let service = self.service.clone();
        match tokio::task::spawn_blocking(move || service.abort()).await {
            Ok(Ok(())) => {}
            Ok(Err(abort_err)) => {
                warn!(task = %self.task, error = %abort_err, "Rollback failed")
            }
            Err(join_err) => {
                warn!(task = %self.task, error = %join_err, "Rollback interrupted")
            }
        }
    }

    async fn timed_service_call<F>(&self, counter: &str, call: F) -> Result<(), ShardWriterError>
    where
        F: FnOnce(&dyn IndexService) -> Result<(), IndexServiceError> + Send + 'static,
    {
        let service = self.service.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || call(service.as_ref()))
            .await
            .map_err(|e| ShardWriterError::InterruptedDuringDrain(e.to_string()))??;

        let elapsed = start.elapsed().as_millis() as u64;
        self.reporter
            .increment_counter(&self.task, COUNTER_GROUP, counter, elapsed);
        debug!(task = %self.task, counter, elapsed_ms = elapsed, "Service call finished");
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<IndexWriteTask>>>,
    context: Arc<WorkerContext>,
) {
    debug!(task = %context.task, worker = worker_id, "Writer worker started");

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(IndexWriteTask { sequence, batch }) = next else {
            break;
        };

        if context.failure.is_set() {
            debug!(
                task = %context.task,
                worker = worker_id,
                batch = sequence,
                "Skipping batch after earlier failure"
            );
            continue;
        }

        let size = batch.len();
        let service = context.service.clone();
        let start = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || service.add_batch(batch)).await;
        let elapsed = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                let reporter = &context.reporter;
                reporter.increment_counter(&context.task, COUNTER_GROUP, "documents_written", size as u64);
                reporter.increment_counter(&context.task, COUNTER_GROUP, "batches_written", 1);
                reporter.increment_counter(&context.task, COUNTER_GROUP, "batch_write_millis", elapsed);
                debug!(
                    task = %context.task,
                    worker = worker_id,
                    batch = sequence,
                    size,
                    elapsed_ms = elapsed,
                    "Wrote batch"
                );
            }
            Ok(Err(e)) => {
                error!(
                    task = %context.task,
                    worker = worker_id,
                    batch = sequence,
                    error = %e,
                    "Index service rejected batch"
                );
                context.failure.record(sequence, e);
            }
            Err(e) => {
                error!(
                    task = %context.task,
                    worker = worker_id,
                    batch = sequence,
                    error = %e,
                    "Batch submission panicked"
                );
                context
                    .failure
                    .record(sequence, IndexServiceError::Rejected(e.to_string()));
            }
        }
    }

    debug!(task = %context.task, worker = worker_id, "Writer worker stopped");
}
