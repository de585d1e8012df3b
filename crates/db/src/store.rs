//! [`TaskStore`] backed by PostgreSQL.

use async_trait::async_trait;
use seqrun_core::outcome::ExecutionResult;
use seqrun_core::store::{check_transition, StoreError, TaskStore};
use seqrun_core::task::{NewTask, StatusId, Task, TaskStatus};
use seqrun_core::types::DbId;

use crate::models::task::TaskRow;
use crate::repositories::TaskRepo;
use crate::DbPool;

const ALL_STATUSES: [TaskStatus; 4] = [
    TaskStatus::Created,
    TaskStatus::Running,
    TaskStatus::Done,
    TaskStatus::Failed,
];

/// Task store over a `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Turn a zero-row conditional update into the matching error.
    async fn explain_miss(&self, id: DbId, from: TaskStatus) -> StoreError {
        match TaskRepo::find_by_id(&self.pool, id).await {
            Ok(Some(row)) => match to_task(row) {
                Ok(current) => StoreError::StaleStatus {
                    id,
                    expected: from,
                    actual: current.status,
                },
                Err(e) => e,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => backend(e),
        }
    }

    /// Explain why a conditional overwrite of `task` matched no row.
    async fn reject_overwrite(&self, task: &Task) -> StoreError {
        match self.find_by_id(task.id).await {
            Ok(Some(current)) => StoreError::IllegalTransition {
                id: task.id,
                from: current.status,
                to: task.status,
            },
            Ok(None) => StoreError::NotFound(task.id),
            Err(e) => e,
        }
    }
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_task(row: TaskRow) -> Result<Task, StoreError> {
    Task::try_from(row).map_err(backend)
}

/// Statuses from which a row may be overwritten with `to`.
fn sources_of(to: TaskStatus) -> Vec<StatusId> {
    ALL_STATUSES
        .into_iter()
        .filter(|from| *from == to || from.can_transition_to(to))
        .map(TaskStatus::id)
        .collect()
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
        let row = TaskRepo::create(&self.pool, &task).await.map_err(backend)?;
        to_task(row)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Task>, StoreError> {
        TaskRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(to_task)
            .transpose()
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_by_status(&self.pool, status.id())
            .await
            .map_err(backend)?
            .into_iter()
            .map(to_task)
            .collect()
    }

    async fn save(&self, task: &Task) -> Result<Task, StoreError> {
        let saved = TaskRepo::upsert(&self.pool, task, &sources_of(task.status))
            .await
            .map_err(backend)?;
        match saved {
            Some(row) => to_task(row),
            None => Err(self.reject_overwrite(task).await),
        }
    }

    async fn update(&self, task: &Task) -> Result<Task, StoreError> {
        let updated = TaskRepo::update_if_status_in(&self.pool, task, &sources_of(task.status))
            .await
            .map_err(backend)?;
        match updated {
            Some(row) => to_task(row),
            None => Err(self.reject_overwrite(task).await),
        }
    }

    async fn transition(
        &self,
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, StoreError> {
        check_transition(id, from, to)?;
        match TaskRepo::compare_and_set_status(&self.pool, id, from.id(), to.id())
            .await
            .map_err(backend)?
        {
            Some(row) => to_task(row),
            None => Err(self.explain_miss(id, from).await),
        }
    }

    async fn finish(
        &self,
        id: DbId,
        from: TaskStatus,
        result: &ExecutionResult,
    ) -> Result<Task, StoreError> {
        let to = result.terminal_status();
        check_transition(id, from, to)?;
        let row = TaskRepo::finish(
            &self.pool,
            id,
            from.id(),
            to.id(),
            result.exit_code,
            &result.reason,
        )
        .await
        .map_err(backend)?;
        match row {
            Some(row) => {
                tracing::debug!(
                    task_id = id,
                    status = %to,
                    exit_code = result.exit_code,
                    "Task finished"
                );
                to_task(row)
            }
            None => Err(self.explain_miss(id, from).await),
        }
    }
}
