//! Database build command (`makeblastdb`).

use super::{is_truthy, optional_u64, required, validate_name, CommandBuilder, CommandContext};
use crate::error::CoreError;
use crate::task::{params, Task};
use crate::template::{CommandVars, MAKEDB_COMMAND_TEMPLATE};
use crate::types::DbId;

/// Accepted values of the `db_type` parameter.
pub const DB_TYPES: [&str; 2] = ["nucl", "prot"];

/// Database type used when the task does not specify one.
pub const DEFAULT_DB_TYPE: &str = "nucl";

/// Which `-blastdb_version` values may be requested, and what to use
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbVersionPolicy {
    pub default: u8,
    pub allowed: Vec<u8>,
}

impl DbVersionPolicy {
    pub fn new(default: u8, allowed: Vec<u8>) -> Self {
        Self { default, allowed }
    }

    /// Resolve a requested version. Anything missing, unparsable, or not in
    /// the allow-list falls back to the default.
    pub fn resolve(&self, requested: Option<&str>) -> u8 {
        let Some(raw) = requested else {
            return self.default;
        };
        match raw.trim().parse::<u8>() {
            Ok(v) if self.allowed.contains(&v) => v,
            _ => {
                tracing::warn!(
                    requested = raw,
                    fallback = self.default,
                    "Unsupported database version, using default",
                );
                self.default
            }
        }
    }
}

impl Default for DbVersionPolicy {
    fn default() -> Self {
        Self::new(5, vec![5, 4])
    }
}

/// A validated database build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeDbCommand {
    pub task_id: DbId,
    pub input_file: String,
    pub database: String,
    pub db_type: String,
    pub parse_seq_ids: bool,
    pub title: Option<String>,
    pub tax_id: Option<u64>,
    pub db_version: u8,
}

impl MakeDbCommand {
    pub fn from_task(task: &Task, versions: &DbVersionPolicy) -> Result<Self, CoreError> {
        let input_file = required(task, params::INPUT_FILE)?;
        validate_name(params::INPUT_FILE, input_file)?;
        let database = required(task, params::DATABASE)?;
        validate_name(params::DATABASE, database)?;

        let db_type = task
            .param(params::DB_TYPE)
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_DB_TYPE.to_string());
        if !DB_TYPES.contains(&db_type.as_str()) {
            return Err(CoreError::Validation(format!(
                "db_type must be one of {}, got '{db_type}'",
                DB_TYPES.join(", ")
            )));
        }

        Ok(Self {
            task_id: task.id,
            input_file: input_file.to_string(),
            database: database.to_string(),
            db_type,
            parse_seq_ids: is_truthy(task.param(params::PARSE_SEQ_IDS)),
            title: task.param(params::TITLE).map(|t| t.trim().to_string()),
            tax_id: optional_u64(task, params::TAX_ID)?,
            db_version: versions.resolve(task.param(params::DB_VERSION)),
        })
    }
}

impl CommandBuilder for MakeDbCommand {
    fn template_name(&self) -> &'static str {
        MAKEDB_COMMAND_TEMPLATE
    }

    fn vars(&self, ctx: &CommandContext) -> CommandVars {
        let mut vars = ctx.base_vars(self.task_id);
        let tax_id = self.tax_id.map(|t| t.to_string());
        let parse_seqids = if self.parse_seq_ids {
            vec!["-parse_seqids".to_string()]
        } else {
            Vec::new()
        };
        vars.text("input_file", self.input_file.clone())
            .text("database", self.database.clone())
            .text("db_type", self.db_type.clone())
            .text("db_version", self.db_version.to_string())
            .args("parse_seqids_flag", parse_seqids)
            .option("title_option", "title", self.title.as_deref())
            .option("taxid_option", "taxid", tax_id.as_deref());
        vars
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
