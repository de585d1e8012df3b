//! Repository for the `tasks` table.
//!
//! Every status write is conditional on the current `status_id`, so a
//! statement that matches zero rows means another writer got there first
//! (or the row does not exist). Callers disambiguate with [`TaskRepo::find_by_id`].

use sqlx::types::Json;
use sqlx::PgPool;
use seqrun_core::task::{NewTask, StatusId, Task, TaskStatus};
use seqrun_core::types::DbId;

use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, task_type, status_id, params, exit_code, reason, created_at, updated_at";

/// Provides CRUD and compare-and-swap operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new task in `Created`.
    pub async fn create(pool: &PgPool, input: &NewTask) -> Result<TaskRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (task_type, status_id, params) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(&input.task_type)
            .bind(TaskStatus::Created.id())
            .bind(Json(&input.params))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All tasks in a status, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        status_id: StatusId,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(status_id)
            .fetch_all(pool)
            .await
    }

    /// Insert `task` under its own id, or overwrite the existing row if its
    /// current status is one of `allowed_current`. Returns `None` if a row
    /// exists in any other status.
    ///
    /// Bumps the id sequence past `task.id` so later inserts do not collide.
    pub async fn upsert(
        pool: &PgPool,
        task: &Task,
        allowed_current: &[StatusId],
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (id, task_type, status_id, params, exit_code, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
                 task_type = EXCLUDED.task_type, \
                 status_id = EXCLUDED.status_id, \
                 params = EXCLUDED.params, \
                 exit_code = EXCLUDED.exit_code, \
                 reason = EXCLUDED.reason, \
                 updated_at = NOW() \
             WHERE tasks.status_id = ANY($8) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(task.id)
            .bind(&task.task_type)
            .bind(task.status.id())
            .bind(Json(&task.params))
            .bind(task.exit_code)
            .bind(&task.reason)
            .bind(task.created_at)
            .bind(allowed_current)
            .fetch_optional(pool)
            .await?;

        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('tasks', 'id'), \
                           GREATEST((SELECT MAX(id) FROM tasks), 1))",
        )
        .execute(pool)
        .await?;
        Ok(row)
    }

    /// Overwrite the mutable columns of `task` if its current status is one
    /// of `allowed_current`. Returns `None` if no row matched.
    pub async fn update_if_status_in(
        pool: &PgPool,
        task: &Task,
        allowed_current: &[StatusId],
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET \
                 task_type = $2, status_id = $3, params = $4, \
                 exit_code = $5, reason = $6, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task.id)
            .bind(&task.task_type)
            .bind(task.status.id())
            .bind(Json(&task.params))
            .bind(task.exit_code)
            .bind(&task.reason)
            .bind(allowed_current)
            .fetch_optional(pool)
            .await
    }

    /// Move `id` from `from` to `to`. Returns `None` if the row is missing
    /// or no longer in `from`.
    pub async fn compare_and_set_status(
        pool: &PgPool,
        id: DbId,
        from: StatusId,
        to: StatusId,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET status_id = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(from)
            .bind(to)
            .fetch_optional(pool)
            .await
    }

    /// Like [`TaskRepo::compare_and_set_status`], also recording the exit
    /// code and reason of the finished attempt.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        from: StatusId,
        to: StatusId,
        exit_code: i32,
        reason: &str,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET status_id = $3, exit_code = $4, reason = $5, updated_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(from)
            .bind(to)
            .bind(exit_code)
            .bind(reason)
            .fetch_optional(pool)
            .await
    }
}
