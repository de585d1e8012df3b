//! Process execution interface and shared types.
//!
//! Defines [`ProcessExecutor`], the seam the router runs commands through,
//! along with [`ProcessOutput`] and [`ExecError`].

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::subprocess;

/// Captured output from one process run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    /// Complete stdout captured from the process (capped).
    pub stdout: String,
    /// Complete stderr captured from the process (capped).
    pub stderr: String,
    /// Process exit code (`128 + signal` if killed by a signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let sep = if self.stdout.ends_with('\n') { "" } else { "\n" };
                format!("{}{sep}{}", self.stdout, self.stderr)
            }
        }
    }
}

/// Errors that prevent a process from producing an exit code.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The command rendered to an empty argument vector.
    #[error("Refusing to run an empty command")]
    EmptyCommand,

    /// Spawning or waiting on the process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The wait was cancelled; the child has been killed.
    #[error("Process interrupted after {elapsed_ms}ms")]
    Interrupted {
        /// Time the process had been running when it was killed.
        elapsed_ms: u64,
    },
}

/// Runs an argument vector to completion.
///
/// Implementations must return [`ExecError::Interrupted`] promptly once
/// `cancel` fires, and must not leave the child running when they do.
pub trait ProcessExecutor: Send + Sync + 'static {
    fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<ProcessOutput, ExecError>> + Send;
}

/// Executor backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    /// Working directory for children (inherits the current one if `None`).
    pub working_directory: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: Some(dir.into()),
        }
    }
}

impl ProcessExecutor for CommandExecutor {
    async fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        let output = subprocess::run_command(&mut cmd, cancel).await?;
        tracing::debug!(
            program = %program,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            output = %output.combined(),
            "Process finished",
        );
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
