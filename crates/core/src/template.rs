//! Named command templates and their renderer.
//!
//! Templates are plain text with `{placeholder}` tokens. They are rendered
//! two ways from the same [`CommandVars`]:
//!
//! - [`TemplateRenderer::render`] produces the flat command string (used for
//!   logging, for the "renders to nothing" check, and by callers that still
//!   want a single line);
//! - [`TemplateRenderer::render_argv`] tokenizes the *template text* first and
//!   substitutes values into the resulting slots, so a value can never create
//!   an extra argument boundary no matter what characters it contains.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::argv::tokenize;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const BLAST_COMMAND_TEMPLATE: &str = "blast_command_template";
pub const MAKEDB_COMMAND_TEMPLATE: &str = "makedb_command_template";
pub const DBINFO_COMMAND_TEMPLATE: &str = "dbinfo_command_template";
pub const CANCEL_COMMAND_TEMPLATE: &str = "cancel_command_template";

/// File extension of template overrides loaded from disk.
pub const TEMPLATE_FILE_EXTENSION: &str = "tmpl";

/// Regex pattern matching `{placeholder}` tokens in command templates.
pub const PLACEHOLDER_PATTERN: &str = r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

static WHOLE_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{PLACEHOLDER_PATTERN}$")).expect("valid regex"));

const SEARCH_TAIL: &str = "-db {db_dir}/{database} -query {query_file} -out {output_file} \
    -outfmt \"{outfmt}\" {taxids_option} {negative_taxids_option} \
    {max_target_seqs_option} {evalue_option} {extra_options}";

const MAKEDB_TAIL: &str = "-in {staging_dir}/{input_file} -dbtype {db_type} \
    {parse_seqids_flag} {title_option} {taxid_option} \
    -blastdb_version {db_version} -out {db_dir}/{database}";

const DOCKER_PREFIX: &str = "docker run --rm --name {task_name} -v {data_dir}:{data_dir} {image}";

// ---------------------------------------------------------------------------
// Runner kind
// ---------------------------------------------------------------------------

/// Where tool invocations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Tools are on the host `PATH`. There is no cancel command; cancelling
    /// kills the child process directly.
    Local,
    /// Every invocation is a named, disposable container.
    Docker,
}

impl RunnerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "docker" => Some(Self::Docker),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Docker => "docker",
        }
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A value bound to a template placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    /// Occupies one argument slot; dropped when blank.
    Text(String),
    /// Spliced as several argument slots (for example `-taxids 4,5,90`).
    Args(Vec<String>),
}

impl VarValue {
    /// String form used by the flat rendering. Arguments containing
    /// whitespace are double-quoted so that tokenizing the flat string gives
    /// the same slots back.
    fn to_flat(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Args(args) => args
                .iter()
                .map(|a| {
                    if a.contains(char::is_whitespace) {
                        format!("\"{a}\"")
                    } else {
                        a.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Variable map handed to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandVars {
    vars: BTreeMap<String, VarValue>,
}

impl CommandVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.vars
            .insert(name.to_string(), VarValue::Text(value.into()));
        self
    }

    pub fn args(&mut self, name: &str, args: Vec<String>) -> &mut Self {
        self.vars.insert(name.to_string(), VarValue::Args(args));
        self
    }

    /// Bind `-<flag> <value>` when `value` is non-blank, nothing otherwise.
    ///
    /// An empty `flag` binds the value on its own, tokenized, for free-form
    /// pass-through options.
    pub fn option(&mut self, name: &str, flag: &str, value: Option<&str>) -> &mut Self {
        self.args(name, option_flag(flag, value))
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.vars.get(name)
    }
}

/// Arguments for an optional command-line flag.
pub fn option_flag(flag: &str, value: Option<&str>) -> Vec<String> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Vec::new();
    };
    if flag.is_empty() {
        tokenize(value)
    } else {
        vec![format!("-{flag}"), value.to_string()]
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Collapse runs of whitespace to a single space and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn substitute(text: &str, vars: &CommandVars) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            vars.get(&caps[1]).map(VarValue::to_flat).unwrap_or_default()
        })
        .into_owned()
}

/// Render template text to a flat, whitespace-collapsed command string.
pub fn render_flat(template: &str, vars: &CommandVars) -> String {
    collapse_whitespace(&substitute(template, vars))
}

/// Render template text directly to argument slots.
pub fn render_slots(template: &str, vars: &CommandVars) -> Vec<String> {
    let mut argv = Vec::new();
    for token in tokenize(template) {
        if let Some(caps) = WHOLE_PLACEHOLDER_RE.captures(&token) {
            match vars.get(&caps[1]) {
                Some(VarValue::Args(args)) => {
                    argv.extend(args.iter().filter(|a| !a.is_empty()).cloned())
                }
                Some(VarValue::Text(s)) if !s.trim().is_empty() => argv.push(s.clone()),
                _ => {}
            }
            continue;
        }
        let rendered = substitute(&token, vars);
        if !rendered.trim().is_empty() {
            argv.push(rendered);
        }
    }
    argv
}

/// Renders named templates against a variable map.
pub trait TemplateRenderer: Send + Sync {
    /// Render `name` to a flat command string. Fails if the template is not
    /// registered.
    fn render(&self, name: &str, vars: &CommandVars) -> Result<String, CoreError>;

    /// Render `name` to argument slots. Fails if the template is not
    /// registered.
    fn render_argv(&self, name: &str, vars: &CommandVars) -> Result<Vec<String>, CoreError>;
}

/// In-memory template set, seeded from the built-ins for a runner and
/// optionally overridden from `*.tmpl` files.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    /// An empty registry; every lookup fails until templates are inserted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in templates for `runner`.
    pub fn builtin(runner: RunnerKind) -> Self {
        let (blast, makedb, dbinfo, cancel) = match runner {
            RunnerKind::Local => (
                format!("{{program}} {SEARCH_TAIL}"),
                format!("makeblastdb {MAKEDB_TAIL}"),
                "blastdbcmd -db {db_dir}/{database} -info".to_string(),
                String::new(),
            ),
            RunnerKind::Docker => (
                format!("{DOCKER_PREFIX} {{program}} {SEARCH_TAIL}"),
                format!("{DOCKER_PREFIX} makeblastdb {MAKEDB_TAIL}"),
                format!("{DOCKER_PREFIX} blastdbcmd -db {{db_dir}}/{{database}} -info"),
                "docker kill {task_name}".to_string(),
            ),
        };

        let mut registry = Self::empty();
        registry.insert(BLAST_COMMAND_TEMPLATE, blast);
        registry.insert(MAKEDB_COMMAND_TEMPLATE, makedb);
        registry.insert(DBINFO_COMMAND_TEMPLATE, dbinfo);
        registry.insert(CANCEL_COMMAND_TEMPLATE, cancel);
        registry
    }

    pub fn insert(&mut self, name: &str, text: impl Into<String>) {
        self.templates.insert(name.to_string(), text.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Override templates from every `<name>.tmpl` file in `dir`.
    ///
    /// Returns the number of templates loaded.
    pub fn load_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            tracing::debug!(
                template = name,
                path = %path.display(),
                "Loaded command template override"
            );
            self.insert(name, text);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn lookup(&self, name: &str) -> Result<&str, CoreError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CoreError::TemplateNotFound(name.to_string()))
    }
}

impl TemplateRenderer for TemplateRegistry {
    fn render(&self, name: &str, vars: &CommandVars) -> Result<String, CoreError> {
        Ok(render_flat(self.lookup(name)?, vars))
    }

    fn render_argv(&self, name: &str, vars: &CommandVars) -> Result<Vec<String>, CoreError> {
        Ok(render_slots(self.lookup(name)?, vars))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
