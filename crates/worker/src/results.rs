//! Read access to finished search output.
//!
//! Output is parsed on demand, never when a task finishes: a task whose
//! output cannot be parsed is still `Done`, only reading it fails.

use std::path::PathBuf;
use std::sync::Arc;

use seqrun_core::commands::CommandContext;
use seqrun_core::hits::{parse_hits, HitSet, ParseError};
use seqrun_core::store::{StoreError, TaskStore};
use seqrun_core::task::{Task, TaskStatus};
use seqrun_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("Task {0} not found")]
    NotFound(DbId),

    #[error("Task {id} is {status}; results are only available once it is DONE")]
    NotDone { id: DbId, status: TaskStatus },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw output file of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResults {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Serves the output of `Done` search tasks.
pub struct ResultsReader {
    store: Arc<dyn TaskStore>,
    context: CommandContext,
}

impl ResultsReader {
    pub fn new(store: Arc<dyn TaskStore>, context: CommandContext) -> Self {
        Self { store, context }
    }

    /// Parsed hits of task `id`, at most `limit` of them.
    pub async fn get_results(
        &self,
        id: DbId,
        limit: Option<usize>,
    ) -> Result<HitSet, ResultsError> {
        let raw = self.get_raw_results(id).await?;
        let hits = parse_hits(raw.bytes.as_slice(), self.context.result_delimiter, limit)?;
        tracing::debug!(task_id = id, count = hits.count, "Parsed results");
        Ok(hits)
    }

    /// The output file of task `id`, unparsed.
    pub async fn get_raw_results(&self, id: DbId) -> Result<RawResults, ResultsError> {
        let task = self.finished_task(id).await?;
        let path = self.context.output_path(task.id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ResultsError::Io {
                path: path.clone(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{id}.out"));
        Ok(RawResults { file_name, bytes })
    }

    async fn finished_task(&self, id: DbId) -> Result<Task, ResultsError> {
        let task = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ResultsError::NotFound(id))?;
        if task.status != TaskStatus::Done {
            return Err(ResultsError::NotDone {
                id,
                status: task.status,
            });
        }
        Ok(task)
    }
}
