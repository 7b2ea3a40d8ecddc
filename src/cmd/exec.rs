/*!
`exec.rs`

Implements `agent-container exec <task-id> <command> [<args>...] [-i] [-t]`,
which launches a process inside a task's container (as a nested container
session) and relays its stdio.

  -i / --interactive   stream local stdin into the process
  -t / --tty           allocate a TTY for the process (raw local terminal)

Arguments that look like flags must follow `--`:
  agent-container exec -it my-task sh -- -c 'ls -la /'

Exits with the process' exit code.
*/

use clap::Args;

use crate::cmd::shared::{AgentResolver, Backend};
use crate::error::{CliError, CliResult};

// CLI arguments for `agent-container exec`
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// ID of the task whose container runs the command
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,

    /// Command to execute
    #[arg(value_name = "COMMAND")]
    pub command: String,

    /// Arguments passed to the command
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Keep stdin attached to the process
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a TTY for the process
    #[arg(short, long)]
    pub tty: bool,
}

pub fn execute_exec(
    args: ExecArgs,
    resolver: &dyn AgentResolver,
    backend: &dyn Backend,
) -> CliResult<i32> {
    let agent = resolver
        .agent()
        .map_err(|e| CliError::wrap("Unable to get agent address", format!("{e:#}")))?;

    let context = format!("Unable to execute command in task '{}'", args.task_id);
    let mut io = backend
        .container_io(&agent, &args.task_id)
        .map_err(|e| CliError::wrap(&context, format!("{e:#}")))?;
    io.exec(&args.command, &args.args, args.interactive, args.tty)
        .map_err(|e| CliError::wrap(&context, format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::shared::fakes::{Call, FakeBackend, FixedAgent};
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        cmd: TestSub,
    }

    #[derive(clap::Subcommand, Debug)]
    enum TestSub {
        Exec(ExecArgs),
    }

    fn parse(argv: &[&str]) -> ExecArgs {
        let TestSub::Exec(a) = TestCli::try_parse_from(argv).unwrap().cmd;
        a
    }

    #[test]
    fn clap_parses_command_and_args() {
        let a = parse(&["t", "exec", "task-1", "echo", "hello", "world"]);
        assert_eq!(a.task_id, "task-1");
        assert_eq!(a.command, "echo");
        assert_eq!(a.args, vec!["hello", "world"]);
        assert!(!a.interactive);
        assert!(!a.tty);
    }

    #[test]
    fn clap_parses_flags_and_hyphenated_args() {
        let a = parse(&["t", "exec", "-i", "-t", "task-1", "sh", "--", "-c", "ls -la"]);
        assert!(a.interactive);
        assert!(a.tty);
        assert_eq!(a.command, "sh");
        assert_eq!(a.args, vec!["-c", "ls -la"]);

        let a = parse(&["t", "exec", "--interactive", "--tty", "task-1", "bash"]);
        assert!(a.interactive && a.tty);
        assert!(a.args.is_empty());
    }

    #[test]
    fn clap_requires_command() {
        assert!(TestCli::try_parse_from(["t", "exec", "task-1"]).is_err());
    }

    #[test]
    fn forwards_arguments_unmodified() {
        let backend = FakeBackend::default();
        let code = execute_exec(
            parse(&["t", "exec", "-i", "task-9", "ls", "/tmp", "/var"]),
            &FixedAgent(Some("https://agent.local:5051")),
            &backend,
        )
        .unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            backend.calls(),
            vec![
                Call::Connect {
                    agent: "https://agent.local:5051".into(),
                    task_id: "task-9".into()
                },
                Call::Exec {
                    command: "ls".into(),
                    args: vec!["/tmp".into(), "/var".into()],
                    interactive: true,
                    tty: false,
                },
            ]
        );
    }

    #[test]
    fn exit_code_is_propagated() {
        let backend = FakeBackend {
            exit_code: 127,
            ..Default::default()
        };
        let code = execute_exec(
            parse(&["t", "exec", "task-9", "nope"]),
            &FixedAgent(Some("agent:5051")),
            &backend,
        )
        .unwrap();
        assert_eq!(code, 127);
    }

    #[test]
    fn failures_are_wrapped() {
        let backend = FakeBackend {
            io_error: Some("LAUNCH_NESTED_CONTAINER_SESSION failed with HTTP 400"),
            ..Default::default()
        };
        let err = execute_exec(
            parse(&["t", "exec", "task-9", "ls"]),
            &FixedAgent(Some("agent:5051")),
            &backend,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to execute command in task 'task-9': LAUNCH_NESTED_CONTAINER_SESSION failed with HTTP 400"
        );

        let err = execute_exec(
            parse(&["t", "exec", "task-9", "ls"]),
            &FixedAgent(None),
            &FakeBackend::default(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Unable to get agent address: "));
    }
}
