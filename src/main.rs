use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;
mod config;
mod error;
mod mesos;
mod utils;

use cmd::format::{Role, StyleOptions, color};
use cmd::{AttachArgs, ExecArgs, ListArgs};
use error::CliResult;

/// Agent Container - interact with the containers running in a Mesos agent.
///
/// Commands:
///   agent-container attach <task-id> [--no-stdin]
///   agent-container exec <task-id> <command> [<args>...] [-i] [-t]
///   agent-container list [-a] [--json]
///
/// Global flags / env:
///   -v / -vv          Increase verbosity (logs go to stderr)
///   -q / --quiet      Errors only
///   --agent ADDR      Agent address (or MESOS_AGENT env, or agent.address in config)
///   --config PATH     Config file (or MESOS_CLI_CONFIG env; default ~/.mesos/config.yaml)
///
/// Examples:
///   agent-container --agent 10.0.0.5:5051 list
///   agent-container exec -it my-task bash
///   agent-container exec my-task sh -- -c 'ls -la /'
///   agent-container attach my-task          (detach with CTRL-p CTRL-q)
#[derive(Parser, Debug)]
#[command(
    name = cmd::PLUGIN_NAME,
    version,
    about = cmd::SHORT_HELP,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (Mesos CLI Agent Container Plugin)"),
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Agent address (host:port or URL)
    #[arg(long = "agent", global = true, value_name = "ADDR")]
    agent: Option<String>,

    /// Path to the YAML config file
    #[arg(long = "config", global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach the CLI to the stdio of a running task
    #[command(long_about = "Attach the CLI to the stdio of a running task.\n\
To detach type the sequence CTRL-p CTRL-q.")]
    Attach(AttachArgs),

    /// Execute commands in a task's container
    Exec(ExecArgs),

    /// List all running tasks in a Mesos agent
    List(ListArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);
    log_debug!("{}", cmd::VERSION);

    match run(cli) {
        Ok(code) => ExitCode::from(exit_byte(code)),
        Err(e) => {
            let style = StyleOptions::detect();
            eprintln!("{}", color(Role::Error, format!("error: {e}"), &style));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<i32> {
    let config = config::Config::load(cli.agent, cli.config);
    let backend = mesos::MesosBackend::new(config.client_settings());

    match cli.command {
        Commands::Attach(args) => cmd::execute_attach(args, &config, &backend),
        Commands::Exec(args) => cmd::execute_exec(args, &config, &backend),
        Commands::List(args) => {
            let style = StyleOptions::detect();
            let mut stdout = std::io::stdout().lock();
            cmd::execute_list(args, &config, &backend, &style, &mut stdout).map(|()| 0)
        }
    }
}

/// Exit codes outside 0..=255 cannot be reported as-is; they count as failure.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
