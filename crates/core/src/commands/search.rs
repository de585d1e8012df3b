//! Sequence search command (`blastn`, `blastp`, ...).

use std::sync::LazyLock;

use regex::Regex;

use super::{optional_u64, required, validate_name, CommandBuilder, CommandContext};
use crate::error::CoreError;
use crate::hits::HIT_FIELDS;
use crate::task::{params, Task};
use crate::template::{CommandVars, BLAST_COMMAND_TEMPLATE};
use crate::types::DbId;

/// Search programs a task may ask for.
pub const ALLOWED_PROGRAMS: [&str; 5] = ["blastn", "blastp", "blastx", "tblastn", "tblastx"];

/// Program used when the task does not name one.
pub const DEFAULT_PROGRAM: &str = "blastn";

/// BLAST tabular output format code.
const TABULAR_FORMAT: &str = "6";

/// Comma-separated taxonomy ids.
static TAX_ID_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(,\d+)*$").expect("valid regex"));

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCommand {
    pub task_id: DbId,
    pub program: String,
    pub database: String,
    pub query_file: String,
    pub tax_ids: Option<String>,
    pub excluded_tax_ids: Option<String>,
    pub max_target_seqs: Option<u64>,
    pub evalue: Option<f64>,
    /// Free-form options appended verbatim (after tokenizing).
    pub options: Option<String>,
}

impl SearchCommand {
    pub fn from_task(task: &Task) -> Result<Self, CoreError> {
        let database = required(task, params::DATABASE)?;
        validate_name(params::DATABASE, database)?;
        let query_file = required(task, params::QUERY_FILE)?;
        validate_name(params::QUERY_FILE, query_file)?;

        let program = task
            .param(params::PROGRAM)
            .map(str::trim)
            .unwrap_or(DEFAULT_PROGRAM);
        if !ALLOWED_PROGRAMS.contains(&program) {
            return Err(CoreError::Validation(format!(
                "program must be one of {}, got '{program}'",
                ALLOWED_PROGRAMS.join(", ")
            )));
        }

        let evalue = task
            .param(params::EVALUE)
            .map(|raw| {
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .ok_or_else(|| {
                        CoreError::Validation(format!(
                            "evalue must be a non-negative number, got '{raw}'"
                        ))
                    })
            })
            .transpose()?;

        Ok(Self {
            task_id: task.id,
            program: program.to_string(),
            database: database.to_string(),
            query_file: query_file.to_string(),
            tax_ids: tax_id_list(task, params::TAX_IDS)?,
            excluded_tax_ids: tax_id_list(task, params::EXCLUDED_TAX_IDS)?,
            max_target_seqs: optional_u64(task, params::MAX_TARGET_SEQS)?,
            evalue,
            options: task.param(params::OPTIONS).map(str::to_string),
        })
    }
}

/// Normalise an optional tax id list (`"4, 5,90"` -> `"4,5,90"`).
fn tax_id_list(task: &Task, key: &str) -> Result<Option<String>, CoreError> {
    let Some(raw) = task.param(key) else {
        return Ok(None);
    };
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if TAX_ID_LIST_RE.is_match(&compact) {
        Ok(Some(compact))
    } else {
        Err(CoreError::Validation(format!(
            "{key} must be a comma-separated list of numeric taxonomy ids, got '{raw}'"
        )))
    }
}

/// The `-outfmt` value for tabular output with every parsed field.
pub fn output_format(delimiter: char) -> String {
    let fields = HIT_FIELDS.join(" ");
    if delimiter == '\t' {
        format!("{TABULAR_FORMAT} {fields}")
    } else {
        format!("{TABULAR_FORMAT} delim={delimiter} {fields}")
    }
}

impl CommandBuilder for SearchCommand {
    fn template_name(&self) -> &'static str {
        BLAST_COMMAND_TEMPLATE
    }

    fn vars(&self, ctx: &CommandContext) -> CommandVars {
        let mut vars = ctx.base_vars(self.task_id);
        let max_target_seqs = self.max_target_seqs.map(|n| n.to_string());
        let evalue = self.evalue.map(|e| e.to_string());
        vars.text("program", self.program.clone())
            .text("database", self.database.clone())
            .text(
                "query_file",
                ctx.staging_dir.join(&self.query_file).display().to_string(),
            )
            .text(
                "output_file",
                ctx.output_path(self.task_id).display().to_string(),
            )
            .text("outfmt", output_format(ctx.result_delimiter))
            .option("taxids_option", "taxids", self.tax_ids.as_deref())
            .option(
                "negative_taxids_option",
                "negative_taxids",
                self.excluded_tax_ids.as_deref(),
            )
            .option(
                "max_target_seqs_option",
                "max_target_seqs",
                max_target_seqs.as_deref(),
            )
            .option("evalue_option", "evalue", evalue.as_deref())
            .option("extra_options", "", self.options.as_deref());
        vars
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
