/*!
Command dispatcher module.

Layout:
  src/cmd/
    mod.rs      (this file: plugin metadata + re-exports)
    attach.rs   (AttachArgs + execute_attach)
    exec.rs     (ExecArgs   + execute_exec)
    list.rs     (ListArgs   + execute_list)
    shared.rs   (collaborator traits: AgentResolver / Backend / ContainerIo)
    format.rs   (table + color helpers for human output)

Conventions:
  - Each subcommand module exposes exactly one public `execute_*` function
    that returns `CliResult<_>`; every collaborator failure is wrapped into
    a `CliError` with a context prefix.
  - Argument structs derive `clap::Args` and are kept minimal.
*/

pub mod attach;
pub mod exec;
pub mod format;
pub mod list;
pub mod shared;

pub use attach::{AttachArgs, execute_attach};
pub use exec::{ExecArgs, execute_exec};
pub use list::{ListArgs, execute_list};

pub const PLUGIN_NAME: &str = "agent-container";
pub const VERSION: &str = "Mesos CLI Agent Container Plugin";
pub const SHORT_HELP: &str = "Interacts with the containers running in a Mesos agent";
