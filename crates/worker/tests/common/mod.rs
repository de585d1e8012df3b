//! Shared fixtures for worker integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seqrun_core::commands::{CommandContext, DbVersionPolicy};
use seqrun_core::exec::{ExecError, ProcessExecutor, ProcessOutput};
use seqrun_core::outcome::ExecutionResult;
use seqrun_core::store::{MemoryTaskStore, StoreError, TaskStore};
use seqrun_core::task::{params, NewTask, Task, TaskStatus, TaskType};
use seqrun_core::template::{RunnerKind, TemplateRegistry};
use seqrun_core::types::DbId;
use seqrun_worker::router::CommandRouter;
use seqrun_worker::scheduler::{Scheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;

/// Database names that change how [`FakeExecutor`] behaves.
pub const DB_HOLD: &str = "hold";
pub const DB_IO_ERROR: &str = "io_error";
pub const DB_PANIC: &str = "panic";
pub const DB_EXIT_3: &str = "exit_3";

/// Process executor that never spawns anything.
///
/// Behaviour is keyed off the database path in the argument vector: `hold`
/// blocks until [`FakeExecutor::release`] or cancellation, `io_error` fails to
/// spawn, `panic` panics, `exit_3` exits with 3. Anything else exits 0 and
/// prints `ok`.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<Vec<String>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    release: CancellationToken,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let every held run (current and future) finish successfully.
    pub fn release(&self) {
        self.state.release.cancel();
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }
}

fn targets(argv: &[String], database: &str) -> bool {
    let suffix = format!("/{database}");
    argv.iter().any(|arg| arg.ends_with(&suffix))
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProcessExecutor for FakeExecutor {
    async fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ExecError> {
        self.state.calls.lock().unwrap().push(argv.to_vec());
        let now = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(&self.state.running);

        if targets(argv, DB_IO_ERROR) {
            return Err(ExecError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "program not found",
            )));
        }
        if targets(argv, DB_PANIC) {
            panic!("executor blew up");
        }
        if targets(argv, DB_HOLD) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ExecError::Interrupted { elapsed_ms: 1 });
                }
                _ = self.state.release.cancelled() => {}
            }
        }

        let exit_code = if targets(argv, DB_EXIT_3) { 3 } else { 0 };
        Ok(ProcessOutput {
            stdout: "ok\n".to_string(),
            stderr: if exit_code == 0 { String::new() } else { "bad\n".to_string() },
            exit_code,
            duration_ms: 1,
        })
    }
}

pub fn context(root: &Path) -> CommandContext {
    CommandContext {
        data_dir: root.to_path_buf(),
        db_dir: root.join("db"),
        staging_dir: root.join("staging"),
        output_dir: root.join("results"),
        image: "ncbi/blast:latest".to_string(),
        result_delimiter: '\t',
        db_versions: DbVersionPolicy::default(),
    }
}

pub fn router(
    store: Arc<dyn TaskStore>,
    executor: FakeExecutor,
    runner: RunnerKind,
    root: &Path,
) -> CommandRouter<FakeExecutor> {
    CommandRouter::new(
        store,
        Arc::new(TemplateRegistry::builtin(runner)),
        context(root),
        executor,
    )
}

/// Task store that records every status change it applied.
pub struct RecordingStore {
    inner: Arc<MemoryTaskStore>,
    changes: Mutex<Vec<(DbId, TaskStatus, TaskStatus)>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<MemoryTaskStore>) -> Self {
        Self {
            inner,
            changes: Mutex::new(Vec::new()),
        }
    }

    /// Statuses task `id` went through, starting with `Created`.
    ///
    /// Panics if a recorded change did not start where the previous one
    /// ended.
    pub fn history(&self, id: DbId) -> Vec<TaskStatus> {
        let mut history = vec![TaskStatus::Created];
        for (task_id, from, to) in self.changes.lock().unwrap().iter() {
            if *task_id != id {
                continue;
            }
            assert_eq!(history.last(), Some(from), "task {id} changed from a stale status");
            history.push(*to);
        }
        history
    }

    fn record(&self, id: DbId, from: TaskStatus, to: TaskStatus) {
        if from != to {
            self.changes.lock().unwrap().push((id, from, to));
        }
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
        self.inner.create(task).await
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Task>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.inner.find_by_status(status).await
    }

    async fn save(&self, task: &Task) -> Result<Task, StoreError> {
        let before = self.inner.find_by_id(task.id).await?;
        let saved = self.inner.save(task).await?;
        if let Some(before) = before {
            self.record(task.id, before.status, saved.status);
        }
        Ok(saved)
    }

    async fn update(&self, task: &Task) -> Result<Task, StoreError> {
        let before = self.inner.find_by_id(task.id).await?;
        let updated = self.inner.update(task).await?;
        if let Some(before) = before {
            self.record(task.id, before.status, updated.status);
        }
        Ok(updated)
    }

    async fn transition(
        &self,
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, StoreError> {
        let task = self.inner.transition(id, from, to).await?;
        self.record(id, from, task.status);
        Ok(task)
    }

    async fn finish(
        &self,
        id: DbId,
        from: TaskStatus,
        result: &ExecutionResult,
    ) -> Result<Task, StoreError> {
        let task = self.inner.finish(id, from, result).await?;
        self.record(id, from, task.status);
        Ok(task)
    }
}

pub struct Harness {
    pub store: Arc<MemoryTaskStore>,
    /// The store as the scheduler sees it.
    pub recorder: Arc<RecordingStore>,
    pub executor: FakeExecutor,
    pub scheduler: Scheduler<FakeExecutor>,
    _dir: tempfile::TempDir,
}

pub fn harness(threads: usize, pending_slack: usize) -> Harness {
    harness_with(threads, pending_slack, RunnerKind::Local)
}

pub fn harness_with(threads: usize, pending_slack: usize, runner: RunnerKind) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Arc::new(MemoryTaskStore::new());
    let recorder = Arc::new(RecordingStore::new(store.clone()));
    let executor = FakeExecutor::new();
    let router = router(recorder.clone(), executor.clone(), runner, dir.path());
    let scheduler = Scheduler::new(
        recorder.clone(),
        Arc::new(router),
        SchedulerConfig {
            threads,
            pending_slack,
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(5),
        },
    );
    Harness {
        store,
        recorder,
        executor,
        scheduler,
        _dir: dir,
    }
}

pub fn search(database: &str) -> NewTask {
    NewTask::new(TaskType::Search)
        .with_param(params::DATABASE, database)
        .with_param(params::QUERY_FILE, "q.fasta")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Wait until the scheduler has nothing in flight.
pub async fn settle(scheduler: &Scheduler<FakeExecutor>) {
    assert!(
        eventually(|| scheduler.in_flight_count() == 0).await,
        "tasks did not settle"
    );
}
