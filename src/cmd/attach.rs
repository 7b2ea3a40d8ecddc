/*!
`attach.rs`

Implements `agent-container attach <task-id> [--no-stdin]`.

Attaches the CLI's stdin/stdout/stderr to the stdio of a running task.
Type CTRL-p CTRL-q to detach. The command exits with the container's exit
code, or 0 after a detach.
*/

use clap::Args;

use crate::cmd::shared::{AgentResolver, Backend};
use crate::error::{CliError, CliResult};

// CLI arguments for `agent-container attach`
#[derive(Args, Debug)]
pub struct AttachArgs {
    /// ID of the task to attach to
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,

    /// Do not attach a stdin
    #[arg(long)]
    pub no_stdin: bool,
}

pub fn execute_attach(
    args: AttachArgs,
    resolver: &dyn AgentResolver,
    backend: &dyn Backend,
) -> CliResult<i32> {
    let agent = resolver
        .agent()
        .map_err(|e| CliError::wrap("Unable to get agent address", format!("{e:#}")))?;

    let context = format!("Unable to attach to task '{}'", args.task_id);
    let mut io = backend
        .container_io(&agent, &args.task_id)
        .map_err(|e| CliError::wrap(&context, format!("{e:#}")))?;
    io.attach(args.no_stdin)
        .map_err(|e| CliError::wrap(&context, format!("{e:#}")))
}
