//! Row model for the `tasks` table.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use seqrun_core::task::{StatusId, Task, TaskStatus};
use seqrun_core::types::{DbId, Timestamp};

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRow {
    pub id: DbId,
    pub task_type: Option<String>,
    pub status_id: StatusId,
    pub params: Json<BTreeMap<String, String>>,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row carried a status ID with no matching [`TaskStatus`].
#[derive(Debug, thiserror::Error)]
#[error("Task {id} has unknown status_id {status_id}")]
pub struct UnknownStatus {
    pub id: DbId,
    pub status_id: StatusId,
}

impl TryFrom<TaskRow> for Task {
    type Error = UnknownStatus;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_id(row.status_id).ok_or(UnknownStatus {
            id: row.id,
            status_id: row.status_id,
        })?;
        Ok(Task {
            id: row.id,
            status,
            task_type: row.task_type,
            params: row.params.0,
            exit_code: row.exit_code,
            reason: row.reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
