//! Task model: status machine, task kinds, and parameter keys.
//!
//! A [`Task`] is an immutable snapshot of a persisted row. Status changes are
//! never made by mutating a shared task value; they go through
//! [`TaskStore::transition`](crate::store::TaskStore::transition), which
//! checks the expected current status before writing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Parameter keys
// ---------------------------------------------------------------------------

/// Well-known keys of [`Task::params`].
pub mod params {
    pub const DATABASE: &str = "database";
    pub const QUERY_FILE: &str = "query_file";
    pub const PROGRAM: &str = "program";
    pub const TAX_IDS: &str = "tax_ids";
    pub const EXCLUDED_TAX_IDS: &str = "excluded_tax_ids";
    pub const MAX_TARGET_SEQS: &str = "max_target_seqs";
    pub const EVALUE: &str = "evalue";
    pub const OPTIONS: &str = "options";
    pub const INPUT_FILE: &str = "input_file";
    pub const DB_TYPE: &str = "db_type";
    pub const PARSE_SEQ_IDS: &str = "parse_seq_ids";
    pub const TITLE: &str = "title";
    pub const TAX_ID: &str = "tax_id";
    pub const DB_VERSION: &str = "db_version";
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Task lifecycle status.
///
/// Discriminants match the seed data of the `task_statuses` lookup table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created = 1,
    Running = 2,
    Done = 3,
    Failed = 4,
}

impl TaskStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to a status.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Created),
            2 => Some(Self::Running),
            3 => Some(Self::Done),
            4 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Every task passes through `Running`, so the lifecycle is always a
    /// prefix of `Created -> Running -> Done | Failed`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl From<TaskStatus> for StatusId {
    fn from(value: TaskStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task type
// ---------------------------------------------------------------------------

/// The kinds of work the router knows how to build a command for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Sequence similarity search (`blastn`, `blastp`, ...).
    Search,
    /// Database build (`makeblastdb`).
    MakeDb,
    /// Database introspection (`blastdbcmd -info`).
    DbInfo,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Search, TaskType::MakeDb, TaskType::DbInfo];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::MakeDb => "makedb",
            Self::DbInfo => "dbinfo",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the router sees when it inspects a task's declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Known(TaskType),
    Unrecognized(String),
    Unset,
}

impl TaskKind {
    /// Classify a raw, possibly absent, type tag. Blank counts as unset.
    pub fn classify(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Unset,
            Some(tag) => match TaskType::parse(tag) {
                Some(t) => Self::Known(t),
                None => Self::Unrecognized(tag.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A persisted task snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: DbId,
    pub status: TaskStatus,
    /// Raw type tag as submitted; see [`Task::kind`].
    pub task_type: Option<String>,
    pub params: BTreeMap<String, String>,
    /// Exit code of the single execution attempt, once finished.
    pub exit_code: Option<i32>,
    /// Captured output or failure description of that attempt.
    pub reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        TaskKind::classify(self.task_type.as_deref())
    }

    /// Look up a parameter, treating blank values as absent.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Name used for the task's process or container (`seqrun-task-<id>`).
    pub fn process_name(&self) -> String {
        process_name(self.id)
    }
}

/// Name used for a task's process or container.
pub fn process_name(id: DbId) -> String {
    format!("seqrun-task-{id}")
}

/// Input for creating a task. New tasks always start in [`TaskStatus::Created`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub task_type: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl NewTask {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type: Some(task_type.as_str().to_string()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
