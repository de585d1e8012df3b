use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use seqrun_core::commands::{CommandContext, DbVersionPolicy};
use seqrun_core::template::RunnerKind;

use crate::scheduler::SchedulerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Size of the worker pool.
    pub threads: usize,
    /// Tasks admitted ahead of a free worker.
    pub pending_slack: usize,
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight tasks after cancelling them.
    pub shutdown_grace: Duration,
    pub runner: RunnerKind,
    pub image: String,
    pub data_dir: PathBuf,
    pub db_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Directory of `*.tmpl` files overriding the built-in templates.
    pub template_dir: Option<PathBuf>,
    pub result_delimiter: char,
    pub db_versions: DbVersionPolicy,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default               |
    /// |-----------------------|-----------------------|
    /// | `DATABASE_URL`        | (required)            |
    /// | `WORKER_THREADS`      | `4`                   |
    /// | `PENDING_SLACK`       | `2`                   |
    /// | `POLL_INTERVAL_MS`    | `1000`                |
    /// | `SHUTDOWN_GRACE_SECS` | `30`                  |
    /// | `RUNNER`              | `local`               |
    /// | `CONTAINER_IMAGE`     | `ncbi/blast:latest`   |
    /// | `DATA_DIR`            | `/data`               |
    /// | `DB_DIR`              | `<DATA_DIR>/db`       |
    /// | `STAGING_DIR`         | `<DATA_DIR>/staging`  |
    /// | `OUTPUT_DIR`          | `<DATA_DIR>/results`  |
    /// | `TEMPLATE_DIR`        | (unset)               |
    /// | `RESULT_DELIMITER`    | `tab`                 |
    /// | `DB_VERSION_DEFAULT`  | `5`                   |
    /// | `DB_VERSION_ALLOWED`  | `5,4`                 |
    /// | `LOG_FORMAT`          | `text`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let threads: usize = parse_or(&var, "WORKER_THREADS", 4)?;
        if threads == 0 {
            return Err(invalid("WORKER_THREADS", "0", "must be at least 1"));
        }
        let pending_slack: usize = parse_or(&var, "PENDING_SLACK", 2)?;
        let poll_interval_ms: u64 = parse_or(&var, "POLL_INTERVAL_MS", 1000)?;
        if poll_interval_ms == 0 {
            return Err(invalid("POLL_INTERVAL_MS", "0", "must be at least 1"));
        }
        let shutdown_grace_secs: u64 = parse_or(&var, "SHUTDOWN_GRACE_SECS", 30)?;

        let runner = match var("RUNNER") {
            None => RunnerKind::Local,
            Some(raw) => RunnerKind::parse(&raw)
                .ok_or_else(|| invalid("RUNNER", &raw, "expected 'local' or 'docker'"))?,
        };
        let image = var("CONTAINER_IMAGE").unwrap_or_else(|| "ncbi/blast:latest".into());

        let data_dir = PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "/data".into()));
        let dir_or = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(default))
        };
        let db_dir = dir_or("DB_DIR", "db");
        let staging_dir = dir_or("STAGING_DIR", "staging");
        let output_dir = dir_or("OUTPUT_DIR", "results");
        let template_dir = var("TEMPLATE_DIR").map(PathBuf::from);

        let result_delimiter = match var("RESULT_DELIMITER") {
            None => '\t',
            Some(raw) => parse_delimiter(&raw)?,
        };

        let default_version: u8 = parse_or(&var, "DB_VERSION_DEFAULT", 5)?;
        let allowed_versions = match var("DB_VERSION_ALLOWED") {
            None => vec![5, 4],
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u8>().map_err(|_| {
                        invalid("DB_VERSION_ALLOWED", &raw, "expected a list of integers")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        if !allowed_versions.contains(&default_version) {
            return Err(invalid(
                "DB_VERSION_DEFAULT",
                &default_version.to_string(),
                "must be one of DB_VERSION_ALLOWED",
            ));
        }

        let log_format = match var("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected 'text' or 'json'")),
        };

        Ok(Self {
            database_url,
            threads,
            pending_slack,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            runner,
            image,
            data_dir,
            db_dir,
            staging_dir,
            output_dir,
            template_dir,
            result_delimiter,
            db_versions: DbVersionPolicy::new(default_version, allowed_versions),
            log_format,
        })
    }

    /// Values every command template may reference.
    pub fn command_context(&self) -> CommandContext {
        CommandContext {
            data_dir: self.data_dir.clone(),
            db_dir: self.db_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            output_dir: self.output_dir.clone(),
            image: self.image.clone(),
            result_delimiter: self.result_delimiter,
            db_versions: self.db_versions.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            threads: self.threads,
            pending_slack: self.pending_slack,
            poll_interval: self.poll_interval,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(key, &raw, "not a valid number")),
    }
}

fn parse_delimiter(raw: &str) -> Result<char, ConfigError> {
    match raw {
        "tab" | "\\t" | "\t" => return Ok('\t'),
        "comma" => return Ok(','),
        _ => {}
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_alphanumeric() && c != '\n' => Ok(c),
        _ => Err(invalid(
            "RESULT_DELIMITER",
            raw,
            "expected 'tab', 'comma' or a single punctuation character",
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/seqrun")]).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.pending_slack, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.runner, RunnerKind::Local);
        assert_eq!(config.db_dir, PathBuf::from("/data/db"));
        assert_eq!(config.staging_dir, PathBuf::from("/data/staging"));
        assert_eq!(config.output_dir, PathBuf::from("/data/results"));
        assert_eq!(config.result_delimiter, '\t');
        assert_eq!(config.db_versions, DbVersionPolicy::default());
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.template_dir.is_none());
    }

    #[test]
    fn database_url_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn directories_follow_data_dir() {
        let config = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("DATA_DIR", "/srv/blast"),
            ("OUTPUT_DIR", "/tmp/out"),
        ])
        .unwrap();
        assert_eq!(config.db_dir, PathBuf::from("/srv/blast/db"));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.command_context().data_dir, PathBuf::from("/srv/blast"));
    }

    #[test]
    fn invalid_numbers_rejected() {
        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("WORKER_THREADS", "many")]),
            Err(ConfigError::Invalid { var: "WORKER_THREADS", .. })
        );
        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("WORKER_THREADS", "0")]),
            Err(ConfigError::Invalid { var: "WORKER_THREADS", .. })
        );
    }

    #[test]
    fn runner_and_log_format() {
        let config = load(&[
            ("DATABASE_URL", "x"),
            ("RUNNER", "docker"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.runner, RunnerKind::Docker);
        assert_eq!(config.log_format, LogFormat::Json);

        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("RUNNER", "k8s")]),
            Err(ConfigError::Invalid { var: "RUNNER", .. })
        );
    }

    #[test]
    fn delimiter_forms() {
        assert_eq!(parse_delimiter("tab").unwrap(), '\t');
        assert_eq!(parse_delimiter("comma").unwrap(), ',');
        assert_eq!(parse_delimiter("|").unwrap(), '|');
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("x").is_err());
    }

    #[test]
    fn default_db_version_must_be_allowed() {
        let config = load(&[
            ("DATABASE_URL", "x"),
            ("DB_VERSION_ALLOWED", "4"),
            ("DB_VERSION_DEFAULT", "4"),
        ])
        .unwrap();
        assert_eq!(config.db_versions, DbVersionPolicy::new(4, vec![4]));

        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("DB_VERSION_ALLOWED", "4")]),
            Err(ConfigError::Invalid { var: "DB_VERSION_DEFAULT", .. })
        );
    }

    #[test]
    fn scheduler_config_copies_limits() {
        let config = load(&[
            ("DATABASE_URL", "x"),
            ("WORKER_THREADS", "8"),
            ("PENDING_SLACK", "0"),
        ])
        .unwrap();
        let sched = config.scheduler_config();
        assert_eq!(sched.threads, 8);
        assert_eq!(sched.pending_slack, 0);
    }
}
