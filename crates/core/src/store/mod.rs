//! Task store interface.
//!
//! [`TaskStore`] is the persistence seam consumed by the scheduler, the
//! router, and the results reader. Backends:
//!
//! - [`MemoryTaskStore`] -- `DashMap`-backed, for tests and single-process
//!   runs without a database.
//! - `PgTaskStore` in the `seqrun-db` crate -- PostgreSQL via sqlx.
//!
//! Status only moves forward. Every status write is conditional on the
//! status the caller last observed, so two writers racing on the same task
//! cannot both succeed.

pub mod memory;

use async_trait::async_trait;

use crate::outcome::ExecutionResult;
use crate::task::{NewTask, Task, TaskStatus};
use crate::types::DbId;

pub use memory::MemoryTaskStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(DbId),

    #[error("Task {id} is {actual}, expected {expected}")]
    StaleStatus {
        id: DbId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Task {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task store backend error: {0}")]
    Backend(String),
}

/// Check a requested status change against the forward-only state machine.
pub fn check_transition(id: DbId, from: TaskStatus, to: TaskStatus) -> Result<(), StoreError> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition { id, from, to })
    }
}

/// Durable task storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in [`TaskStatus::Created`].
    async fn create(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<Task>, StoreError>;

    /// All tasks currently in `status`, oldest first.
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

    /// Insert `task` under its own id, or overwrite the existing task.
    /// Overwriting fails with [`StoreError::IllegalTransition`] if it would
    /// move status backwards.
    async fn save(&self, task: &Task) -> Result<Task, StoreError>;

    /// Overwrite an existing task. Fails with [`StoreError::NotFound`] if the
    /// id does not exist and [`StoreError::IllegalTransition`] if the write
    /// would move status backwards.
    async fn update(&self, task: &Task) -> Result<Task, StoreError>;

    /// Compare-and-swap the status of `id` from `from` to `to`.
    async fn transition(
        &self,
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, StoreError>;

    /// Move `id` from `from` to the terminal status implied by `result` and
    /// record the result alongside it.
    async fn finish(
        &self,
        id: DbId,
        from: TaskStatus,
        result: &ExecutionResult,
    ) -> Result<Task, StoreError>;
}
