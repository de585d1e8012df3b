//! Execution outcome codes and the per-execution result record.
//!
//! The numeric codes are a stable contract with callers. Zero is the only
//! success value; the negative values classify failures that happened
//! around the external process; positive values are the process's own exit
//! code passed through unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// Classified outcome of a run or cancel call.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    SuccessfulExecution = 0,
    IoException = -1,
    ThreadInterruption = -2,
    OtherException = -3,
    NullCommandType = -4,
    UnrecognizedCommandType = -5,
}

impl ExitCode {
    pub const ALL: [ExitCode; 6] = [
        ExitCode::SuccessfulExecution,
        ExitCode::IoException,
        ExitCode::ThreadInterruption,
        ExitCode::OtherException,
        ExitCode::NullCommandType,
        ExitCode::UnrecognizedCommandType,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw code back to a taxonomy member. Process exit codes other
    /// than zero are not part of the taxonomy and return `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Stable identifier shown to callers instead of internal detail.
    pub fn name(self) -> &'static str {
        match self {
            Self::SuccessfulExecution => "SUCCESSFUL_EXECUTION",
            Self::IoException => "IO_EXCEPTION",
            Self::ThreadInterruption => "THREAD_INTERRUPTION_EXCEPTION",
            Self::OtherException => "OTHER_EXCEPTION",
            Self::NullCommandType => "NULL_COMMAND_TYPE",
            Self::UnrecognizedCommandType => "UNRECOGNIZED_COMMAND_TYPE",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Result of one task execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub reason: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, reason: impl Into<String>) -> Self {
        Self {
            exit_code,
            reason: reason.into(),
        }
    }

    /// Build a result from a taxonomy code, using its name when no better
    /// description is available.
    pub fn classified(code: ExitCode, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() {
            code.name().to_string()
        } else {
            format!("{}: {reason}", code.name())
        };
        Self::new(code.code(), reason)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == ExitCode::SuccessfulExecution.code()
    }

    /// Terminal status a task receives for this result.
    pub fn terminal_status(&self) -> TaskStatus {
        if self.is_success() {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
