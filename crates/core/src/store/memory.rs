//! In-memory [`TaskStore`] backed by `DashMap`.
//!
//! Compare-and-swap operations hold the entry's shard lock for the duration
//! of the check and the write, which makes them atomic per task.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{check_transition, StoreError, TaskStore};
use crate::outcome::ExecutionResult;
use crate::task::{NewTask, Task, TaskStatus};
use crate::types::DbId;

/// Thread-safe in-memory task store.
#[derive(Debug)]
pub struct MemoryTaskStore {
    tasks: DashMap<DbId, Task>,
    next_id: AtomicI64,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self {
            tasks: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn cas(
        &self,
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
        result: Option<&ExecutionResult>,
    ) -> Result<Task, StoreError> {
        check_transition(id, from, to)?;
        let mut entry = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status != from {
            return Err(StoreError::StaleStatus {
                id,
                expected: from,
                actual: entry.status,
            });
        }
        entry.status = to;
        if let Some(result) = result {
            entry.exit_code = Some(result.exit_code);
            entry.reason = Some(result.reason.clone());
        }
        entry.updated_at = chrono::Utc::now();
        Ok(entry.clone())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = chrono::Utc::now();
        let task = Task {
            id,
            status: TaskStatus::Created,
            task_type: task.task_type,
            params: task.params,
            exit_code: None,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn save(&self, task: &Task) -> Result<Task, StoreError> {
        match self.tasks.entry(task.id) {
            Entry::Occupied(mut entry) => {
                check_transition(task.id, entry.get().status, task.status)?;
                entry.insert(task.clone());
            }
            Entry::Vacant(entry) => {
                self.next_id.fetch_max(task.id + 1, Ordering::SeqCst);
                entry.insert(task.clone());
            }
        }
        Ok(task.clone())
    }

    async fn update(&self, task: &Task) -> Result<Task, StoreError> {
        let mut entry = self
            .tasks
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound(task.id))?;
        check_transition(task.id, entry.status, task.status)?;
        let mut updated = task.clone();
        updated.created_at = entry.created_at;
        updated.updated_at = chrono::Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }

    async fn transition(
        &self,
        id: DbId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, StoreError> {
        self.cas(id, from, to, None)
    }

    async fn finish(
        &self,
        id: DbId,
        from: TaskStatus,
        result: &ExecutionResult,
    ) -> Result<Task, StoreError> {
        self.cas(id, from, result.terminal_status(), Some(result))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
