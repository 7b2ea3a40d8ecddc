/*!
shared.rs - collaborator seams shared by the subcommands.

  - AgentResolver : where the target agent lives (implemented by `Config`)
  - Backend       : agent queries + container I/O factory (`MesosBackend`)
  - ContainerIo   : an attach / exec session bound to one task

Subcommands only ever talk to these traits, so tests can swap in fakes.
*/

use anyhow::Result;
use serde_json::Value;

use crate::mesos::AgentAddress;

pub trait AgentResolver {
    fn agent(&self) -> Result<AgentAddress>;
}

/// Interactive stdio client for a single task's container.
pub trait ContainerIo {
    /// Attach local stdio to the container. Returns the exit code to report.
    fn attach(&mut self, no_stdin: bool) -> Result<i32>;

    /// Run `command args...` inside the container. Returns its exit code.
    fn exec(&mut self, command: &str, args: &[String], interactive: bool, tty: bool)
    -> Result<i32>;
}

pub trait Backend {
    fn container_io(&self, agent: &AgentAddress, task_id: &str) -> Result<Box<dyn ContainerIo>>;

    /// Raw container records (JSON objects) known to the agent.
    fn get_containers(&self, agent: &AgentAddress, all: bool) -> Result<Vec<Value>>;
}
