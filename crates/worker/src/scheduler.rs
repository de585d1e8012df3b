//! Task scheduler.
//!
//! Polls the store for `Created` tasks every `poll_interval` and dispatches
//! them with bounded concurrency. Two semaphores do the bounding:
//!
//! - **admission** (`threads + pending_slack` permits) caps how many tasks
//!   are tracked at once. A permit is taken at dispatch and released when the
//!   task settles.
//! - **workers** (`threads` permits) is the pool itself. An admitted task
//!   waits here before its command is spawned.
//!
//! Every admitted task has exactly one entry in the in-flight map, keyed by
//! task id, for as long as it holds its admission permit. [`InFlightGuard`]
//! ties the two together so both are released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use seqrun_core::exec::ProcessExecutor;
use seqrun_core::outcome::{ExecutionResult, ExitCode};
use seqrun_core::store::{StoreError, TaskStore};
use seqrun_core::task::{Task, TaskStatus};
use seqrun_core::types::DbId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::router::CommandRouter;

/// How long dispatch waits for an admission permit that raced away between
/// counting and acquiring.
const ADMISSION_WAIT: Duration = Duration::from_millis(50);

/// Concurrency and timing limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the worker pool.
    pub threads: usize,
    /// Tasks admitted ahead of a free worker.
    pub pending_slack: usize,
    pub poll_interval: Duration,
    /// How long shutdown waits for cancelled tasks to settle.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            pending_slack: 2,
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight tracking
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InFlight {
    cancel: CancellationToken,
    /// Set once the task holds a worker slot and heads for its command.
    started: Arc<AtomicBool>,
}

/// Removes a task's in-flight entry and releases its admission permit when
/// dropped.
struct InFlightGuard {
    task_id: DbId,
    in_flight: Arc<DashMap<DbId, InFlight>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.task_id);
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Dispatches `Created` tasks to the command router.
pub struct Scheduler<E> {
    store: Arc<dyn TaskStore>,
    router: Arc<CommandRouter<E>>,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    in_flight: Arc<DashMap<DbId, InFlight>>,
    tracker: TaskTracker,
    config: SchedulerConfig,
}

impl<E: ProcessExecutor> Scheduler<E> {
    pub fn new(
        store: Arc<dyn TaskStore>,
        router: Arc<CommandRouter<E>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            router,
            admission: Arc::new(Semaphore::new(config.threads + config.pending_slack)),
            workers: Arc::new(Semaphore::new(config.threads)),
            in_flight: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            config,
        }
    }

    /// Run the poll loop until `shutdown` is cancelled, then cancel
    /// everything still in flight and wait (up to the grace period) for it to
    /// settle.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            threads = self.config.threads,
            pending_slack = self.config.pending_slack,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Scheduler started",
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(dispatched) => tracing::debug!(dispatched, "Dispatched tasks"),
                        Err(e) => tracing::error!(error = %e, "Poll cycle failed"),
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// One poll cycle. Returns the number of tasks dispatched.
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let available = self.admission.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let candidates = self.store.find_by_status(TaskStatus::Created).await?;
        let mut dispatched = 0;
        for task in candidates
            .into_iter()
            .filter(|task| !self.in_flight.contains_key(&task.id))
            .take(available)
        {
            let Some(permit) = self.admit().await else {
                break;
            };
            let cancel = CancellationToken::new();
            let started = Arc::new(AtomicBool::new(false));
            match self.in_flight.entry(task.id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(InFlight {
                        cancel: cancel.clone(),
                        started: Arc::clone(&started),
                    });
                }
            }
            tracing::debug!(task_id = task.id, "Dispatching task");
            self.spawn_worker(task, cancel, started, permit);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        match self.admission.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => {
                tokio::time::timeout(ADMISSION_WAIT, self.admission.clone().acquire_owned())
                    .await
                    .ok()?
                    .ok()
            }
            Err(TryAcquireError::Closed) => None,
        }
    }

    fn spawn_worker(
        &self,
        task: Task,
        cancel: CancellationToken,
        started: Arc<AtomicBool>,
        permit: OwnedSemaphorePermit,
    ) {
        let guard = InFlightGuard {
            task_id: task.id,
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        };
        let store = Arc::clone(&self.store);
        let router = Arc::clone(&self.router);
        let workers = Arc::clone(&self.workers);

        self.tracker.spawn(async move {
            let _guard = guard;
            let task_id = task.id;
            let handle = tokio::spawn(run_worker(
                Arc::clone(&store),
                router,
                workers,
                task,
                cancel,
                started,
            ));
            if let Err(e) = handle.await {
                tracing::error!(task_id, error = %e, "Task worker did not complete");
                let result = ExecutionResult::classified(ExitCode::OtherException, e.to_string());
                recover(store.as_ref(), task_id, &result).await;
            }
        });
    }

    /// Cancel a dispatched task.
    ///
    /// Idempotent: only the first call for a tracked task signals its worker.
    /// The runner's cancel command runs only if the task already holds a
    /// worker slot; a task still waiting for one never started anything.
    /// Returns the task's persisted status, which may still read `Running`
    /// until the worker settles.
    pub async fn cancel_task(&self, task_id: DbId) -> Result<Option<TaskStatus>, StoreError> {
        let tracked = self
            .in_flight
            .get(&task_id)
            .map(|entry| (entry.cancel.clone(), Arc::clone(&entry.started)));
        match tracked {
            Some((token, started)) if !token.is_cancelled() => {
                tracing::info!(task_id, "Cancelling task");
                token.cancel();
                if started.load(Ordering::SeqCst) {
                    self.stop_command(task_id).await;
                } else {
                    tracing::debug!(task_id, "Task cancelled before it started");
                }
            }
            Some(_) => tracing::debug!(task_id, "Task already cancelled"),
            None => tracing::debug!(task_id, "Task not in flight"),
        }
        Ok(self.store.find_by_id(task_id).await?.map(|task| task.status))
    }

    async fn stop_command(&self, task_id: DbId) {
        let outcome = self.router.cancel_task(task_id).await;
        if !outcome.is_success() {
            tracing::warn!(
                task_id,
                exit_code = outcome.exit_code,
                reason = %outcome.reason,
                "Cancel command failed",
            );
        }
    }

    async fn shutdown(&self) {
        let ids: Vec<DbId> = self.in_flight.iter().map(|entry| *entry.key()).collect();
        for task_id in ids {
            if let Err(e) = self.cancel_task(task_id).await {
                tracing::warn!(task_id, error = %e, "Failed to cancel task during shutdown");
            }
        }

        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.in_flight.len(),
                "Shutdown grace period elapsed with tasks still in flight",
            );
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Spare admission capacity.
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    pub fn is_in_flight(&self, task_id: DbId) -> bool {
        self.in_flight.contains_key(&task_id)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker<E: ProcessExecutor>(
    store: Arc<dyn TaskStore>,
    router: Arc<CommandRouter<E>>,
    workers: Arc<Semaphore>,
    task: Task,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
) {
    let slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = workers.acquire_owned() => permit.ok(),
    };
    // Publish `started` before the last cancellation check so a concurrent
    // cancel either sees it or is seen here.
    let slot = slot.and_then(|permit| {
        started.store(true, Ordering::SeqCst);
        (!cancel.is_cancelled()).then_some(permit)
    });
    let Some(_slot) = slot else {
        let result =
            ExecutionResult::classified(ExitCode::ThreadInterruption, "cancelled before start");
        abandon(store.as_ref(), task.id, &result).await;
        return;
    };

    match router.run_task(&task, &cancel).await {
        Ok(report) => finalize(store.as_ref(), task.id, report.status, &report.result).await,
        Err(e) => tracing::warn!(task_id = task.id, error = %e, "Task was not claimed"),
    }
}

async fn finalize(
    store: &dyn TaskStore,
    task_id: DbId,
    from: TaskStatus,
    result: &ExecutionResult,
) {
    match store.finish(task_id, from, result).await {
        Ok(task) => tracing::info!(
            task_id,
            status = %task.status,
            exit_code = result.exit_code,
            "Task settled",
        ),
        Err(e) => tracing::error!(task_id, error = %e, "Failed to record task result"),
    }
}

/// Fail a task that never reached its command. It is claimed first so that
/// it still passes through `Running`.
async fn abandon(store: &dyn TaskStore, task_id: DbId, result: &ExecutionResult) {
    match store
        .transition(task_id, TaskStatus::Created, TaskStatus::Running)
        .await
    {
        Ok(_) => finalize(store, task_id, TaskStatus::Running, result).await,
        Err(e) => tracing::warn!(task_id, error = %e, "Task was not claimed"),
    }
}

/// Settle a task whose worker died without finalizing it.
async fn recover(store: &dyn TaskStore, task_id: DbId, result: &ExecutionResult) {
    match store.find_by_id(task_id).await {
        Ok(Some(task)) if task.status == TaskStatus::Created => {
            abandon(store, task_id, result).await;
        }
        Ok(Some(task)) if !task.status.is_terminal() => {
            finalize(store, task_id, task.status, result).await;
        }
        Ok(_) => {}
        Err(e) => tracing::error!(task_id, error = %e, "Failed to load task for recovery"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
