//! Liveness reporting during long blocking operations.
//!
//! The host scheduler kills a task that stays silent for longer than its
//! silence timeout. Index writes and commits can block for longer than that,
//! so every such operation runs while a [`LivenessGuard`] is held. While at
//! least one guard is alive a background task reports progress on a fixed
//! interval; nested guards share one reporting session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::task::{TaskAttemptId, TaskReporter};

struct LivenessState {
    /// Number of guards currently held
    depth: usize,
    /// Incremented each time a reporting session starts
    session: u64,
    token: Option<CancellationToken>,
    reporter: Arc<dyn TaskReporter>,
    reports_sent: u64,
}

struct LivenessInner {
    task: TaskAttemptId,
    interval: Duration,
    state: Mutex<LivenessState>,
}

impl LivenessInner {
    fn lock(&self) -> MutexGuard<'_, LivenessState> {
        // Reporting must keep working even if a reporter panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send one report if `session` is still the active one.
    ///
    /// The session is checked under the state lock; the host call runs
    /// without it, so a slow host never blocks taking or releasing a guard.
    /// No report starts once the last guard has been released.
    fn report(&self, session: u64) -> bool {
        let reporter = {
            let state = self.lock();
            if state.depth == 0 || state.session != session {
                return false;
            }
            state.reporter.clone()
        };

        if let Err(e) = reporter.progress() {
            warn!(task = %self.task, error = %e, "Liveness report failed");
        }
        self.lock().reports_sent += 1;
        true
    }

    fn release(&self) {
        let mut state = self.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            if let Some(token) = state.token.take() {
                token.cancel();
            }
            debug!(task = %self.task, session = state.session, "Liveness protection ended");
        }
    }
}

/// Periodic liveness reporter shared by every protected operation of a task.
#[derive(Clone)]
pub struct LivenessReporter {
    inner: Arc<LivenessInner>,
}

impl LivenessReporter {
    /// Create a reporter that reports every `interval` while protected.
    pub fn new(task: TaskAttemptId, reporter: Arc<dyn TaskReporter>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                task,
                interval,
                state: Mutex::new(LivenessState {
                    depth: 0,
                    session: 0,
                    token: None,
                    reporter,
                    reports_sent: 0,
                }),
            }),
        }
    }

    /// Begin protecting the current operation.
    ///
    /// Reporting continues until the returned guard, and every other guard
    /// taken meanwhile, has been dropped. Outside a Tokio runtime no
    /// background reporting can start; the guard is still returned.
    pub fn start_protecting(&self) -> LivenessGuard {
        let mut state = self.inner.lock();
        state.depth += 1;

        if state.depth == 1 {
            state.session += 1;
            let session = state.session;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let token = CancellationToken::new();
                    handle.spawn(run_reporter(self.inner.clone(), session, token.clone()));
                    state.token = Some(token);
                    debug!(task = %self.inner.task, session, "Liveness protection started");
                }
                Err(_) => {
                    warn!(task = %self.inner.task, "No runtime available; liveness reports disabled")
                }
            }
        }

        LivenessGuard {
            inner: self.inner.clone(),
        }
    }

    /// Report to a different host context from now on.
    pub fn set_reporter(&self, reporter: Arc<dyn TaskReporter>) {
        self.inner.lock().reporter = reporter;
    }

    /// Whether any protected operation is in flight.
    pub fn is_protecting(&self) -> bool {
        self.inner.lock().depth > 0
    }

    /// Total number of liveness reports sent.
    pub fn reports_sent(&self) -> u64 {
        self.inner.lock().reports_sent
    }

    /// Time between reports while protected.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

/// RAII guard that ends liveness protection when dropped.
///
/// Dropping happens on every exit path, including errors and panics.
pub struct LivenessGuard {
    inner: Arc<LivenessInner>,
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

async fn run_reporter(inner: Arc<LivenessInner>, session: u64, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if !inner.report(session) {
                    break;
                }
            }
        }
    }
}
