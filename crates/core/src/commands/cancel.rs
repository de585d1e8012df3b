//! Cancel command.
//!
//! Stops whatever the runner started under a task's process name. For the
//! local runner the template is empty: killing the child process is all the
//! cancellation there is, so callers treat an empty command as a no-op.

use super::{CommandBuilder, CommandContext};
use crate::task::process_name;
use crate::template::{CommandVars, CANCEL_COMMAND_TEMPLATE};
use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelCommand {
    pub task_id: DbId,
    pub task_name: String,
}

impl CancelCommand {
    /// Cancel command for the process started on behalf of `task_id`.
    pub fn for_task(task_id: DbId) -> Self {
        Self {
            task_id,
            task_name: process_name(task_id),
        }
    }
}

impl CommandBuilder for CancelCommand {
    fn template_name(&self) -> &'static str {
        CANCEL_COMMAND_TEMPLATE
    }

    fn vars(&self, ctx: &CommandContext) -> CommandVars {
        let mut vars = ctx.base_vars(self.task_id);
        vars.text("task_name", self.task_name.clone());
        vars
    }
}
