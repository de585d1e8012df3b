//! Command builders, one per task kind.
//!
//! Each builder is constructed from a [`Task`] (validating required fields
//! up front) and then turned into a [`BuiltCommand`] by rendering its named
//! template. Validation failures surface as [`CoreError`] before anything is
//! spawned.

pub mod cancel;
pub mod dbinfo;
pub mod makedb;
pub mod search;

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;
use crate::task::{process_name, Task, TaskType};
use crate::template::{CommandVars, TemplateRenderer};
use crate::types::DbId;

pub use cancel::CancelCommand;
pub use dbinfo::DbInfoCommand;
pub use makedb::{DbVersionPolicy, MakeDbCommand};
pub use search::SearchCommand;

/// Allowed characters for database and staged file names. No path
/// separators, no leading dot.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Runner context
// ---------------------------------------------------------------------------

/// Deployment-level values every template may reference.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Root mounted into containers.
    pub data_dir: PathBuf,
    /// Where databases live (`-db`, `-out` of makeblastdb).
    pub db_dir: PathBuf,
    /// Where query and input FASTA files are staged.
    pub staging_dir: PathBuf,
    /// Where search output files are written.
    pub output_dir: PathBuf,
    /// Container image for the docker runner.
    pub image: String,
    /// Column delimiter of search output.
    pub result_delimiter: char,
    pub db_versions: DbVersionPolicy,
}

impl CommandContext {
    /// Output file of a search task.
    pub fn output_path(&self, task_id: DbId) -> PathBuf {
        self.output_dir.join(format!("{task_id}.out"))
    }

    /// Variables shared by all templates.
    pub fn base_vars(&self, task_id: DbId) -> CommandVars {
        let mut vars = CommandVars::new();
        vars.text("data_dir", self.data_dir.display().to_string())
            .text("db_dir", self.db_dir.display().to_string())
            .text("staging_dir", self.staging_dir.display().to_string())
            .text("output_dir", self.output_dir.display().to_string())
            .text("image", self.image.clone())
            .text("task_id", task_id.to_string())
            .text("task_name", process_name(task_id));
        vars
    }
}

// ---------------------------------------------------------------------------
// Built command
// ---------------------------------------------------------------------------

/// A rendered command, ready for the process executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    /// Flat, whitespace-collapsed rendering of the template.
    pub rendered: String,
    /// Argument vector; `argv[0]` is the program.
    pub argv: Vec<String>,
}

impl BuiltCommand {
    pub fn render(
        renderer: &dyn TemplateRenderer,
        template: &str,
        vars: &CommandVars,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            rendered: renderer.render(template, vars)?,
            argv: renderer.render_argv(template, vars)?,
        })
    }

    /// A template that renders to nothing means "nothing to run".
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

/// Turns validated task parameters into a runnable command.
pub trait CommandBuilder: Send + Sync {
    /// Name of the template this builder renders.
    fn template_name(&self) -> &'static str;

    /// Template variables for this command.
    fn vars(&self, ctx: &CommandContext) -> CommandVars;

    fn build(
        &self,
        renderer: &dyn TemplateRenderer,
        ctx: &CommandContext,
    ) -> Result<BuiltCommand, CoreError> {
        BuiltCommand::render(renderer, self.template_name(), &self.vars(ctx))
    }
}

/// Construct the builder matching `task_type` from `task`'s parameters.
pub fn builder_for(
    task_type: TaskType,
    task: &Task,
    ctx: &CommandContext,
) -> Result<Box<dyn CommandBuilder>, CoreError> {
    Ok(match task_type {
        TaskType::Search => Box::new(SearchCommand::from_task(task)?),
        TaskType::MakeDb => Box::new(MakeDbCommand::from_task(task, &ctx.db_versions)?),
        TaskType::DbInfo => Box::new(DbInfoCommand::from_task(task)?),
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Fetch a required, non-blank parameter.
pub(crate) fn required<'a>(task: &'a Task, key: &'static str) -> Result<&'a str, CoreError> {
    task.param(key)
        .map(str::trim)
        .ok_or(CoreError::MissingField(key))
}

/// Validate that `value` is a bare file or database name.
pub(crate) fn validate_name(field: &str, value: &str) -> Result<(), CoreError> {
    if NAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} '{value}' may only contain letters, digits, '_', '.', or '-' \
             and must not start with '.' or '-'"
        )))
    }
}

/// Parse an optional positive integer parameter.
pub(crate) fn optional_u64(task: &Task, key: &str) -> Result<Option<u64>, CoreError> {
    task.param(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CoreError::Validation(format!("{key} must be a positive integer, got '{raw}'"))
                })
        })
        .transpose()
}

/// Truthy flag values accepted in parameters.
pub(crate) fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------
