use crate::config::WorkerConfig;
use crate::queue::{QueueItem, WorkQueue};
use crate::requester::{ErrorKind, Requester};
use crate::state::{ItemStatus, StopReason};
use crate::storage::{self, ActionOutcome, Storage};
use crate::worker::action::{ActionError, ActionReceipt, ActionRunner};
use crate::worker::stats::{StatsTracker, WorkerStatus};
use crate::FeedpaceError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Options for one `start()` call
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Use this template for every item instead of a random one
    pub template: Option<String>,
}

struct LoopContext {
    queue: WorkQueue,
    runner: ActionRunner,
    stats: StatsTracker,
    settings: WorkerConfig,
}

struct RunningTask {
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// What the loop does after an item
enum Next {
    Pace,
    Stop,
}

/// Background worker draining one queue
///
/// Lifecycle: `not_started -> running -> stopping -> stopped`. The loop runs
/// as one tokio task; `stop()` cancels a token that is observed between items
/// and during sleeps, never while an action is in flight.
pub struct WorkerLoop {
    ctx: Arc<LoopContext>,
    task: Mutex<Option<RunningTask>>,
}

impl WorkerLoop {
    pub fn new(queue: WorkQueue, runner: ActionRunner, settings: WorkerConfig) -> Self {
        Self {
            ctx: Arc::new(LoopContext {
                queue,
                runner,
                stats: StatsTracker::new(),
                settings,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.ctx.queue
    }

    pub fn requester(&self) -> &Arc<Requester> {
        self.ctx.runner.requester()
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_alive(&self) -> bool {
        self.task_slot()
            .as_ref()
            .map_or(false, |t| !t.join.is_finished())
    }

    fn reconcile(&self, alive: bool) {
        if self.ctx.stats.reconcile_liveness(alive) {
            warn!(queue = %self.ctx.queue.name(), "Worker task ended unexpectedly");
        }
    }

    /// Starts the loop on the current tokio runtime
    ///
    /// Does nothing if the previous loop task is still alive. Otherwise claims
    /// left behind by an earlier run are released and counters reset.
    ///
    /// # Returns
    ///
    /// * `Ok(WorkerStatus)` - Status after the call
    /// * `Err(FeedpaceError::NoRuntime)` - Called outside a tokio runtime
    pub fn start(&self, options: StartOptions) -> crate::Result<WorkerStatus> {
        let handle = Handle::try_current().map_err(|_| FeedpaceError::NoRuntime)?;

        {
            let mut slot = self.task_slot();
            if slot.as_ref().map_or(false, |t| !t.join.is_finished()) {
                debug!(queue = %self.ctx.queue.name(), "Worker already running");
            } else {
                self.ctx.queue.release_stale_claims()?;
                self.ctx.stats.begin_run();

                let token = CancellationToken::new();
                let join = handle.spawn(run_loop(Arc::clone(&self.ctx), token.clone(), options));
                *slot = Some(RunningTask { token, join });

                info!(queue = %self.ctx.queue.name(), "Worker started");
            }
        }

        Ok(self.get_status())
    }

    /// Requests a cooperative stop
    ///
    /// Returns once the state reads `stopping`; the loop exits at its next
    /// check. Confirm with `get_status().running == false`. A loop task that
    /// already died keeps its `crashed` stop reason.
    pub fn stop(&self) -> WorkerStatus {
        let alive = self.task_alive();
        self.reconcile(alive);

        if alive {
            if let Some(task) = self.task_slot().as_ref() {
                task.token.cancel();
            }
            self.ctx.stats.mark_stopping();
            info!(queue = %self.ctx.queue.name(), "Worker stop requested");
        }
        self.get_status()
    }

    /// Current counters, queue counts and liveness
    ///
    /// If the loop task has ended without reaching its normal exit, the state
    /// is corrected to `stopped` here rather than reporting a stale `running`.
    pub fn get_status(&self) -> WorkerStatus {
        self.reconcile(self.task_alive());

        let queue_stats = match self.ctx.queue.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(queue = %self.ctx.queue.name(), "Failed to read queue stats: {}", e);
                None
            }
        };
        self.ctx.stats.snapshot(self.ctx.queue.name(), queue_stats)
    }

    /// Stops the loop and waits up to `timeout` for it to exit
    ///
    /// A loop still busy after the timeout is aborted; its claim, if any, is
    /// released by the next `start()`.
    pub async fn shutdown(&self, timeout: Duration) -> WorkerStatus {
        self.stop();

        let task = self.task_slot().take();
        if let Some(RunningTask { join, .. }) = task {
            let abort = join.abort_handle();
            match tokio::time::timeout(timeout, join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(queue = %self.ctx.queue.name(), "Worker task failed: {}", e);
                }
                Err(_) => {
                    warn!(
                        queue = %self.ctx.queue.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Worker did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }

        self.get_status()
    }
}

/// Sleeps unless cancelled first
///
/// # Returns
///
/// `false` if the token was cancelled
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_loop(ctx: Arc<LoopContext>, token: CancellationToken, options: StartOptions) {
    let queue = ctx.queue.name().to_string();
    let idle = ctx.settings.idle_poll_interval();
    info!(queue = %queue, template = ?options.template, "Worker loop running");

    loop {
        if token.is_cancelled() {
            break;
        }

        let item = match ctx.queue.claim_one_pending() {
            Ok(Some(item)) => item,
            Ok(None) => {
                if !pause(&token, idle).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                error!(queue = %queue, "Failed to claim next item: {}", e);
                if let Next::Stop = count_failure(&ctx, &e.to_string()) {
                    break;
                }
                if !pause(&token, idle).await {
                    break;
                }
                continue;
            }
        };

        debug!(queue = %queue, key = %item.key, ordering_ts = item.ordering_ts, "Claimed item");
        let result = ctx
            .runner
            .perform(&item.key, options.template.as_deref())
            .await;

        let next = match result {
            Ok(receipt) => on_success(&ctx, &item, receipt),
            Err(err) => on_error(&ctx, &item, err),
        };
        if let Next::Stop = next {
            break;
        }

        // The requester's recommended delay is the only pacing between items
        let delay = ctx.runner.requester().recommended_delay();
        debug!(queue = %queue, delay_ms = delay.as_millis() as u64, "Pacing");
        if !pause(&token, delay).await {
            break;
        }
    }

    ctx.stats.mark_stopped();
    info!(
        queue = %queue,
        reason = %ctx.stats.stop_reason().unwrap_or(StopReason::Requested),
        "Worker loop stopped"
    );
}

fn on_success(ctx: &LoopContext, item: &QueueItem, receipt: ActionReceipt) -> Next {
    // Logged before the status update so a restart can tell the action happened
    audit(
        ctx,
        &item.key,
        ActionOutcome::Sent,
        receipt.remote_id.as_deref(),
        receipt.content.as_deref(),
        None,
    );

    if let Err(e) = ctx.queue.mark_done(&item.key, receipt.remote_id.as_deref()) {
        // The claim is kept; the next start() completes the item from the log
        error!(queue = %item.queue, key = %item.key, "Failed to mark item done: {}", e);
        return count_failure(ctx, &e.to_string());
    }

    ctx.stats.record_success();
    info!(
        queue = %item.queue,
        key = %item.key,
        remote_id = receipt.remote_id.as_deref().unwrap_or("-"),
        "Action sent"
    );
    Next::Pace
}

fn on_error(ctx: &LoopContext, item: &QueueItem, err: ActionError) -> Next {
    let message = err.to_string();

    match err.kind() {
        ErrorKind::RateLimited => {
            // A scheduling delay, not an item fault
            release(ctx, item);
            ctx.stats.note_error(&message);
            warn!(
                queue = %item.queue,
                key = %item.key,
                delay_ms = ctx.runner.requester().recommended_delay().as_millis() as u64,
                "{}, item left pending",
                message
            );
            Next::Pace
        }
        ErrorKind::Auth | ErrorKind::AccountRestricted => {
            release(ctx, item);
            let reason = if err.kind() == ErrorKind::Auth {
                StopReason::AuthError
            } else {
                StopReason::AccountRestricted
            };
            ctx.stats.record_fatal(reason, &message);
            error!(queue = %item.queue, key = %item.key, %reason, "Stopping worker: {}", message);
            Next::Stop
        }
        ErrorKind::Client | ErrorKind::Server | ErrorKind::Network => {
            let recorded = if err.is_permanent() {
                ctx.queue.fail_now(&item.key, &message)
            } else {
                ctx.queue.bump_failure(&item.key, &message)
            };
            match recorded {
                Ok(ItemStatus::Failed) => {
                    warn!(queue = %item.queue, key = %item.key, "Action failed, item given up: {}", message)
                }
                Ok(_) => {
                    warn!(queue = %item.queue, key = %item.key, "Action failed, will retry: {}", message)
                }
                Err(e) => {
                    error!(queue = %item.queue, key = %item.key, "Failed to record failure: {}", e)
                }
            }

            audit(ctx, &item.key, ActionOutcome::Failed, None, None, Some(&message));
            count_failure(ctx, &message)
        }
    }
}

/// Counts a failure and trips the circuit breaker at the configured limit
fn count_failure(ctx: &LoopContext, message: &str) -> Next {
    let consecutive = ctx.stats.record_failure(message);
    if consecutive >= ctx.settings.max_consecutive_failures {
        ctx.stats.record_fatal(StopReason::CircuitBreaker, message);
        error!(
            queue = %ctx.queue.name(),
            consecutive,
            "Circuit breaker tripped, stopping worker"
        );
        return Next::Stop;
    }
    Next::Pace
}

fn release(ctx: &LoopContext, item: &QueueItem) {
    if let Err(e) = ctx.queue.release(&item.key) {
        error!(queue = %item.queue, key = %item.key, "Failed to release claim: {}", e);
    }
}

fn audit(
    ctx: &LoopContext,
    key: &str,
    outcome: ActionOutcome,
    remote_id: Option<&str>,
    content: Option<&str>,
    error: Option<&str>,
) {
    let result = storage::lock(ctx.queue.storage()).and_then(|mut db| {
        db.record_action(ctx.queue.name(), key, outcome, remote_id, content, error)
    });
    if let Err(e) = result {
        warn!(queue = %ctx.queue.name(), key, "Failed to write action log: {}", e);
    }
}
