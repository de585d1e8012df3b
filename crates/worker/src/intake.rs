//! Task submission.
//!
//! Parameters are validated with the same builders the router uses, so a
//! task that would fail to build is rejected here instead of being stored.
//! Search queries arrive as sequence text and are staged to a file before
//! the task exists, so a dispatched search always finds its query.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use seqrun_core::commands::{builder_for, CommandContext};
use seqrun_core::error::CoreError;
use seqrun_core::staging::{FileStager, StagingError};
use seqrun_core::store::{StoreError, TaskStore};
use seqrun_core::task::{params, NewTask, Task, TaskStatus, TaskType};

/// Extension given to staged query files.
const QUERY_FILE_EXTENSION: &str = "fasta";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates and stores new tasks.
pub struct TaskIntake {
    store: Arc<dyn TaskStore>,
    context: CommandContext,
    stager: FileStager,
    sequence: AtomicU64,
}

impl TaskIntake {
    pub fn new(store: Arc<dyn TaskStore>, context: CommandContext) -> Self {
        Self {
            store,
            context,
            stager: FileStager,
            sequence: AtomicU64::new(0),
        }
    }

    /// Stage `query` and create a search task reading it.
    ///
    /// `params` carries the remaining search parameters (`database`,
    /// `program`, `evalue`, ...); any `query_file` in it is replaced.
    pub async fn submit_search(
        &self,
        query: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<Task, IntakeError> {
        if query.trim().is_empty() {
            return Err(CoreError::MissingField("query").into());
        }
        let file_name = self.query_file_name();
        params.insert(params::QUERY_FILE.to_string(), file_name.clone());
        self.validate(TaskType::Search, &params)?;

        let path = self
            .stager
            .write(&self.context.staging_dir, query, &file_name)
            .await?;
        let new_task = NewTask {
            task_type: Some(TaskType::Search.as_str().to_string()),
            params,
        };
        match self.store.create(new_task).await {
            Ok(task) => {
                tracing::info!(task_id = task.id, query_file = %file_name, "Search submitted");
                Ok(task)
            }
            Err(e) => {
                if let Err(cleanup) = self.stager.remove(&path).await {
                    tracing::warn!(error = %cleanup, "Failed to remove orphaned query");
                }
                Err(e.into())
            }
        }
    }

    /// Create a database build task from a FASTA file already in the
    /// staging directory.
    pub async fn submit_makedb(
        &self,
        params: BTreeMap<String, String>,
    ) -> Result<Task, IntakeError> {
        self.submit(TaskType::MakeDb, params).await
    }

    /// Create a task describing database `database`.
    pub async fn submit_dbinfo(&self, database: &str) -> Result<Task, IntakeError> {
        let params = BTreeMap::from([(params::DATABASE.to_string(), database.to_string())]);
        self.submit(TaskType::DbInfo, params).await
    }

    async fn submit(
        &self,
        task_type: TaskType,
        params: BTreeMap<String, String>,
    ) -> Result<Task, IntakeError> {
        self.validate(task_type, &params)?;
        let task = self
            .store
            .create(NewTask {
                task_type: Some(task_type.as_str().to_string()),
                params,
            })
            .await?;
        tracing::info!(task_id = task.id, task_type = %task_type, "Task submitted");
        Ok(task)
    }

    fn validate(
        &self,
        task_type: TaskType,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let now = chrono::Utc::now();
        let probe = Task {
            id: 0,
            status: TaskStatus::Created,
            task_type: Some(task_type.as_str().to_string()),
            params: params.clone(),
            exit_code: None,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        builder_for(task_type, &probe, &self.context).map(|_| ())
    }

    fn query_file_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "query-{}-{seq}.{QUERY_FILE_EXTENSION}",
            chrono::Utc::now().timestamp_micros()
        )
    }
}
