//! Command execution router.
//!
//! Takes one task end to end: moves it to `Running`, picks the builder for
//! its type, renders and runs the command, and classifies the outcome into
//! an [`ExecutionResult`]. Persisting the terminal status is left to the
//! scheduler's worker, which owns the task's lifecycle.

use std::sync::Arc;

use seqrun_core::commands::{
    builder_for, BuiltCommand, CancelCommand, CommandBuilder, CommandContext, SearchCommand,
};
use seqrun_core::error::CoreError;
use seqrun_core::exec::{ExecError, ProcessExecutor};
use seqrun_core::outcome::{ExecutionResult, ExitCode};
use seqrun_core::staging::FileStager;
use seqrun_core::store::{StoreError, TaskStore};
use seqrun_core::task::{Task, TaskKind, TaskStatus, TaskType};
use seqrun_core::template::TemplateRenderer;
use seqrun_core::types::DbId;
use tokio_util::sync::CancellationToken;

/// Outcome of [`CommandRouter::run_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub result: ExecutionResult,
    /// Persisted status of the task when the run ended; the terminal status
    /// is written from here.
    pub status: TaskStatus,
}

/// Routes tasks to command builders and runs the resulting commands.
pub struct CommandRouter<E> {
    store: Arc<dyn TaskStore>,
    templates: Arc<dyn TemplateRenderer>,
    context: CommandContext,
    executor: E,
    stager: FileStager,
}

impl<E: ProcessExecutor> CommandRouter<E> {
    pub fn new(
        store: Arc<dyn TaskStore>,
        templates: Arc<dyn TemplateRenderer>,
        context: CommandContext,
        executor: E,
    ) -> Self {
        Self {
            store,
            templates,
            context,
            executor,
            stager: FileStager,
        }
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Run `task` once.
    ///
    /// The task is first claimed with a `Created -> Running`
    /// compare-and-swap; losing that race is the only error this returns.
    /// Tasks without a dispatchable type are then classified without
    /// spawning anything, so every task that leaves `Created` does so
    /// through `Running`.
    pub async fn run_task(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<RunReport, StoreError> {
        let running = self
            .store
            .transition(task.id, TaskStatus::Created, TaskStatus::Running)
            .await?;

        let result = match running.kind() {
            TaskKind::Known(task_type) => {
                let result = self.execute(task_type, &running, cancel).await;
                if task_type == TaskType::Search {
                    self.remove_staged_query(&running).await;
                }
                tracing::info!(
                    task_id = task.id,
                    task_type = %task_type,
                    exit_code = result.exit_code,
                    "Task run finished",
                );
                result
            }
            TaskKind::Unset => {
                tracing::warn!(task_id = task.id, "Task has no type");
                ExecutionResult::classified(ExitCode::NullCommandType, "")
            }
            TaskKind::Unrecognized(tag) => {
                tracing::warn!(task_id = task.id, task_type = %tag, "Unrecognized task type");
                ExecutionResult::classified(ExitCode::UnrecognizedCommandType, format!("'{tag}'"))
            }
        };

        Ok(RunReport {
            result,
            status: running.status,
        })
    }

    async fn execute(
        &self,
        task_type: TaskType,
        task: &Task,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let command = match self.build(task_type, task) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(task_id = task.id, error = %e, "Failed to build command");
                return ExecutionResult::classified(ExitCode::OtherException, e.to_string());
            }
        };
        if command.is_empty() {
            return ExecutionResult::classified(
                ExitCode::OtherException,
                format!("{task_type} command rendered empty"),
            );
        }

        tracing::info!(task_id = task.id, command = %command.rendered, "Running command");
        match self.executor.run(&command.argv, cancel).await {
            Ok(output) => ExecutionResult::new(output.exit_code, output.combined()),
            Err(e) => classify_error(e),
        }
    }

    fn build(&self, task_type: TaskType, task: &Task) -> Result<BuiltCommand, CoreError> {
        builder_for(task_type, task, &self.context)?.build(self.templates.as_ref(), &self.context)
    }

    async fn remove_staged_query(&self, task: &Task) {
        let Ok(search) = SearchCommand::from_task(task) else {
            return;
        };
        let path = self.context.staging_dir.join(&search.query_file);
        if let Err(e) = self.stager.remove(&path).await {
            tracing::warn!(task_id = task.id, error = %e, "Failed to remove staged query");
        }
    }

    /// Stop whatever the runner started for `task_id`.
    ///
    /// With no cancel template (local runner) this is a no-op reported as
    /// success. The cancel command itself cannot be interrupted.
    pub async fn cancel_task(&self, task_id: DbId) -> ExecutionResult {
        let command = match CancelCommand::for_task(task_id)
            .build(self.templates.as_ref(), &self.context)
        {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Failed to build cancel command");
                return ExecutionResult::classified(ExitCode::OtherException, e.to_string());
            }
        };
        if command.is_empty() {
            tracing::debug!(task_id, "No cancel command for this runner");
            return ExecutionResult::new(ExitCode::SuccessfulExecution.code(), "");
        }

        tracing::info!(task_id, command = %command.rendered, "Running cancel command");
        match self.executor.run(&command.argv, &CancellationToken::new()).await {
            Ok(output) => ExecutionResult::new(output.exit_code, output.combined()),
            Err(e) => classify_error(e),
        }
    }
}

fn classify_error(err: ExecError) -> ExecutionResult {
    let code = match &err {
        ExecError::Io(_) => ExitCode::IoException,
        ExecError::Interrupted { .. } => ExitCode::ThreadInterruption,
        ExecError::EmptyCommand => ExitCode::OtherException,
    };
    ExecutionResult::classified(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_errors_map_to_codes() {
        let io = classify_error(ExecError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        )));
        assert_eq!(io.exit_code, ExitCode::IoException.code());
        assert_eq!(io.reason, "IO_EXCEPTION: I/O error: no such file");

        let interrupted = classify_error(ExecError::Interrupted { elapsed_ms: 5 });
        assert_eq!(interrupted.exit_code, ExitCode::ThreadInterruption.code());
        assert_eq!(interrupted.terminal_status(), TaskStatus::Failed);

        let empty = classify_error(ExecError::EmptyCommand);
        assert_eq!(empty.exit_code, ExitCode::OtherException.code());
    }
}
