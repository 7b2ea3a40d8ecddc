/*!
`list.rs`

Implements `agent-container list [-a|--all] [--json]`.

Prints a table of the containers known to the agent:

  Container ID   Executor ID   Framework ID

Behavior:
  - Nested container ids render as `parent.child`.
  - Standalone / nested containers (only with --all) have no executor or
    framework; those cells render as `-`.
  - No containers -> "There are no containers running in the agent."

JSON Output Shape:
{
  "status": "ok",
  "agent": "<agent address>",
  "count": 2,
  "containers": [
    { "container_id": "...", "executor_id": "...", "framework_id": "..." }
  ]
}
*/

use anyhow::{Result, anyhow};
use clap::Args;
use serde_json::Value;
use std::io::Write;

use crate::cmd::format::{StyleOptions, Table};
use crate::cmd::shared::{AgentResolver, Backend};
use crate::error::{CliError, CliResult};

pub const NO_CONTAINERS: &str = "There are no containers running in the agent.";

const HEADERS: [&str; 3] = ["Container ID", "Executor ID", "Framework ID"];

// CLI arguments for `agent-container list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// List all containers (nested and standalone too), not only task containers
    #[arg(short, long)]
    pub all: bool,

    /// Output JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// One display row of the container table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContainerRow {
    container_id: String,
    executor_id: String,
    framework_id: String,
}

pub fn execute_list(
    args: ListArgs,
    resolver: &dyn AgentResolver,
    backend: &dyn Backend,
    style: &StyleOptions,
    out: &mut dyn Write,
) -> CliResult<()> {
    let agent = resolver
        .agent()
        .map_err(|e| CliError::wrap("Unable to get agent address", format!("{e:#}")))?;

    let containers = backend.get_containers(&agent, args.all).map_err(|e| {
        CliError::wrap(
            format!("Unable to get containers from agent '{agent}'"),
            format!("{e:#}"),
        )
    })?;

    if args.json {
        let rows = containers
            .iter()
            .map(container_row)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| CliError::wrap("Unable to build list of containers", e))?;
        let items: Vec<Value> = rows
            .into_iter()
            .map(|r| {
                serde_json::json!({
                    "container_id": r.container_id,
                    "executor_id": r.executor_id,
                    "framework_id": r.framework_id
                })
            })
            .collect();
        let doc = serde_json::json!({
            "status": "ok",
            "agent": agent.original(),
            "count": items.len(),
            "containers": items
        });
        return write_out(out, &doc.to_string());
    }

    if containers.is_empty() {
        return write_out(out, NO_CONTAINERS);
    }

    let table = build_table(&containers)
        .map_err(|e| CliError::wrap("Unable to build table of containers", e))?;
    write_out(out, &table.render(style))
}

fn build_table(containers: &[Value]) -> Result<Table> {
    let mut table = Table::new(&HEADERS);
    for container in containers {
        let row = container_row(container)?;
        table.add_row(vec![row.container_id, row.executor_id, row.framework_id])?;
    }
    Ok(table)
}

fn container_row(container: &Value) -> Result<ContainerRow> {
    let obj = container
        .as_object()
        .ok_or_else(|| anyhow!("container record is not an object"))?;
    let container_id = obj
        .get("container_id")
        .and_then(render_id)
        .ok_or_else(|| anyhow!("container record has no 'container_id'"))?;
    let optional = |key: &str| {
        obj.get(key)
            .and_then(render_id)
            .unwrap_or_else(|| "-".to_string())
    };
    Ok(ContainerRow {
        container_id,
        executor_id: optional("executor_id"),
        framework_id: optional("framework_id"),
    })
}

/// Accepts either a bare string or a Mesos `{ "value": .., "parent": {..} }` id.
fn render_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let own = map.get("value")?.as_str()?;
            match map.get("parent").and_then(render_id) {
                Some(parent) => Some(format!("{parent}.{own}")),
                None => Some(own.to_string()),
            }
        }
        _ => None,
    }
}

fn write_out(out: &mut dyn Write, text: &str) -> CliResult<()> {
    writeln!(out, "{text}").map_err(|e| CliError::wrap("Unable to write output", e))
}
