//! Database introspection command (`blastdbcmd -info`).

use super::{required, validate_name, CommandBuilder, CommandContext};
use crate::error::CoreError;
use crate::task::{params, Task};
use crate::template::{CommandVars, DBINFO_COMMAND_TEMPLATE};
use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInfoCommand {
    pub task_id: DbId,
    pub database: String,
}

impl DbInfoCommand {
    pub fn from_task(task: &Task) -> Result<Self, CoreError> {
        let database = required(task, params::DATABASE)?;
        validate_name(params::DATABASE, database)?;
        Ok(Self {
            task_id: task.id,
            database: database.to_string(),
        })
    }
}

impl CommandBuilder for DbInfoCommand {
    fn template_name(&self) -> &'static str {
        DBINFO_COMMAND_TEMPLATE
    }

    fn vars(&self, ctx: &CommandContext) -> CommandVars {
        let mut vars = ctx.base_vars(self.task_id);
        vars.text("database", self.database.clone());
        vars
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::commands::test_helpers::{context, task};
    use crate::task::TaskType;
    use crate::template::{RunnerKind, TemplateRegistry};

    #[test]
    fn renders_info_command() {
        let task = task(8, TaskType::DbInfo, &[("database", "swissprot")]);
        let command = DbInfoCommand::from_task(&task)
            .expect("valid task")
            .build(&TemplateRegistry::builtin(RunnerKind::Local), &context())
            .expect("render");
        assert_eq!(command.rendered, "blastdbcmd -db /data/db/swissprot -info");
        assert_eq!(command.argv, vec!["blastdbcmd", "-db", "/data/db/swissprot", "-info"]);
    }

    #[test]
    fn database_required() {
        let task = task(8, TaskType::DbInfo, &[]);
        assert_matches!(
            DbInfoCommand::from_task(&task),
            Err(CoreError::MissingField("database"))
        );
    }
}
