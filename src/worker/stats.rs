//! Counters shared between a running worker and status queries

use crate::queue::QueueStats;
use crate::state::{RunState, StopReason};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct Counters {
    state: RunState,
    processed: u64,
    errors: u64,
    last_error: Option<String>,
    consecutive_failures: u32,
    stop_reason: Option<StopReason>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            state: RunState::NotStarted,
            processed: 0,
            errors: 0,
            last_error: None,
            consecutive_failures: 0,
            stop_reason: None,
        }
    }
}

/// Snapshot returned by `get_status()`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub queue: String,
    pub state: RunState,
    pub running: bool,
    pub processed: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub stop_reason: Option<StopReason>,
    /// `None` when the counts could not be read
    pub queue_stats: Option<QueueStats>,
}

/// Mutex-guarded worker counters
///
/// The worker task is the only writer apart from `stop()` and liveness
/// reconciliation; status callers read snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    inner: Arc<Mutex<Counters>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay meaningful after a panic elsewhere, so poisoning is ignored
    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears all counters and enters `running`
    pub fn begin_run(&self) {
        *self.counters() = Counters {
            state: RunState::Running,
            ..Counters::default()
        };
    }

    pub fn record_success(&self) {
        let mut c = self.counters();
        c.processed += 1;
        c.consecutive_failures = 0;
    }

    /// Counts an item-level failure
    ///
    /// # Returns
    ///
    /// The consecutive failure count after this failure
    pub fn record_failure(&self, error: &str) -> u32 {
        let mut c = self.counters();
        c.errors += 1;
        c.consecutive_failures += 1;
        c.last_error = Some(error.to_string());
        c.consecutive_failures
    }

    /// Remembers an error without counting it as a failure
    pub fn note_error(&self, error: &str) {
        self.counters().last_error = Some(error.to_string());
    }

    /// Records the fault that is about to stop the worker
    pub fn record_fatal(&self, reason: StopReason, error: &str) {
        let mut c = self.counters();
        c.last_error = Some(error.to_string());
        c.stop_reason = Some(reason);
        if c.state == RunState::Running {
            c.state = RunState::Stopping;
        }
    }

    /// Marks a requested stop; a no-op unless running
    pub fn mark_stopping(&self) {
        let mut c = self.counters();
        if c.state == RunState::Running {
            c.state = RunState::Stopping;
            c.stop_reason.get_or_insert(StopReason::Requested);
        }
    }

    /// Marks the loop as exited
    pub fn mark_stopped(&self) {
        let mut c = self.counters();
        c.state = RunState::Stopped;
        c.stop_reason.get_or_insert(StopReason::Requested);
    }

    /// Corrects the state when the worker task is gone
    ///
    /// A task that died while the state still says `running` or `stopping`
    /// never reached [`StatsTracker::mark_stopped`]; it is reported stopped,
    /// and as crashed unless a stop reason was already known.
    ///
    /// # Returns
    ///
    /// `true` if the state was corrected
    pub fn reconcile_liveness(&self, alive: bool) -> bool {
        let mut c = self.counters();
        if alive || !c.state.is_active() {
            return false;
        }
        c.state = RunState::Stopped;
        c.stop_reason.get_or_insert(StopReason::Crashed);
        true
    }

    pub fn state(&self) -> RunState {
        self.counters().state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.counters().stop_reason
    }

    /// Builds a status snapshot
    pub fn snapshot(&self, queue: &str, queue_stats: Option<QueueStats>) -> WorkerStatus {
        let c = self.counters();
        WorkerStatus {
            queue: queue.to_string(),
            state: c.state,
            running: c.state == RunState::Running,
            processed: c.processed,
            errors: c.errors,
            last_error: c.last_error.clone(),
            consecutive_failures: c.consecutive_failures,
            stop_reason: c.stop_reason,
            queue_stats,
        }
    }
}
