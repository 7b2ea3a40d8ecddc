/*!
messages.rs - JSON shapes of the agent v1 operator API calls we issue.

Calls are built as `serde_json::Value` (mirroring the protobuf JSON mapping),
`bytes` fields are base64 encoded. Only the subset needed by attach / exec /
list is modelled here.
*/

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;

/* ---- Container IDs ---- */

/// A (possibly nested) Mesos container id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerId {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<ContainerId>>,
}

impl ContainerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: None,
        }
    }

    /// A child of `parent` with the given id value.
    pub fn nested(parent: ContainerId, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: Some(Box::new(parent)),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}.")?;
        }
        f.write_str(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub columns: u16,
}

/* ---- Simple calls ---- */

pub fn get_containers(all: bool) -> Value {
    json!({
        "type": "GET_CONTAINERS",
        "get_containers": {
            "show_nested": all,
            "show_standalone": all
        }
    })
}

pub fn get_tasks() -> Value {
    json!({ "type": "GET_TASKS" })
}

/// Wait on a container. Nested containers use WAIT_NESTED_CONTAINER.
pub fn wait_container(id: &ContainerId) -> Value {
    if id.is_nested() {
        json!({
            "type": "WAIT_NESTED_CONTAINER",
            "wait_nested_container": { "container_id": id }
        })
    } else {
        json!({
            "type": "WAIT_CONTAINER",
            "wait_container": { "container_id": id }
        })
    }
}

/// Pull the waitpid-style `exit_status` from a WAIT_* response.
pub fn exit_status(response: &Value) -> Option<i32> {
    ["wait_nested_container", "wait_container"]
        .iter()
        .find_map(|key| response.get(*key))
        .and_then(|w| w.get("exit_status"))
        .and_then(|s| s.as_i64())
        .map(|s| s as i32)
}

/* ---- Streaming output calls ---- */

pub fn launch_nested_container_session(
    id: &ContainerId,
    command: &str,
    args: &[String],
    tty: Option<WindowSize>,
) -> Value {
    let mut arguments = Vec::with_capacity(args.len() + 1);
    arguments.push(command.to_string());
    arguments.extend(args.iter().cloned());

    let mut session = json!({
        "container_id": id,
        "command": {
            "value": command,
            "arguments": arguments,
            "shell": false
        }
    });
    if let Some(size) = tty {
        session["container"] = json!({
            "type": "MESOS",
            "tty_info": { "window_size": window_size(size) }
        });
    }

    json!({
        "type": "LAUNCH_NESTED_CONTAINER_SESSION",
        "launch_nested_container_session": session
    })
}

pub fn attach_container_output(id: &ContainerId) -> Value {
    json!({
        "type": "ATTACH_CONTAINER_OUTPUT",
        "attach_container_output": { "container_id": id }
    })
}

/* ---- Streaming input records ---- */

/// First record of every ATTACH_CONTAINER_INPUT stream.
pub fn attach_input_container_id(id: &ContainerId) -> Value {
    json!({
        "type": "ATTACH_CONTAINER_INPUT",
        "attach_container_input": {
            "type": "CONTAINER_ID",
            "container_id": id
        }
    })
}

/// STDIN data; an empty slice signals EOF to the agent.
pub fn stdin_data(data: &[u8]) -> Value {
    process_io_input(json!({
        "type": "DATA",
        "data": {
            "type": "STDIN",
            "data": BASE64.encode(data)
        }
    }))
}

pub fn tty_info(size: WindowSize) -> Value {
    process_io_input(json!({
        "type": "CONTROL",
        "control": {
            "type": "TTY_INFO",
            "tty_info": { "window_size": window_size(size) }
        }
    }))
}

pub fn heartbeat(interval: Duration) -> Value {
    process_io_input(json!({
        "type": "CONTROL",
        "control": {
            "type": "HEARTBEAT",
            "heartbeat": {
                "interval": { "nanoseconds": interval.as_nanos() as i64 }
            }
        }
    }))
}

fn process_io_input(process_io: Value) -> Value {
    json!({
        "type": "ATTACH_CONTAINER_INPUT",
        "attach_container_input": {
            "type": "PROCESS_IO",
            "process_io": process_io
        }
    })
}

fn window_size(size: WindowSize) -> Value {
    json!({ "rows": size.rows, "columns": size.columns })
}

/* ---- Streaming output records ---- */

/// A decoded ProcessIO record from an output stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessOutput {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Control,
}

pub fn decode_process_output(payload: &[u8]) -> Result<ProcessOutput> {
    let value: Value = serde_json::from_slice(payload).context("malformed ProcessIO record")?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("DATA") => {
            let data = value
                .get("data")
                .ok_or_else(|| anyhow!("DATA record without 'data'"))?;
            let bytes = match data.get("data").and_then(|d| d.as_str()) {
                Some(encoded) => BASE64
                    .decode(encoded)
                    .context("ProcessIO data is not valid base64")?,
                None => Vec::new(),
            };
            match data.get("type").and_then(|t| t.as_str()) {
                Some("STDOUT") => Ok(ProcessOutput::Stdout(bytes)),
                Some("STDERR") => Ok(ProcessOutput::Stderr(bytes)),
                other => bail!("unexpected ProcessIO data type: {other:?}"),
            }
        }
        Some("CONTROL") => Ok(ProcessOutput::Control),
        other => bail!("unexpected ProcessIO record type: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> ContainerId {
        ContainerId::new("parent-1")
    }

    #[test]
    fn nested_container_display() {
        let id = ContainerId::nested(parent(), "child");
        assert_eq!(id.to_string(), "parent-1.child");
        assert_eq!(
            serde_json::to_value(&id).unwrap(),
            json!({"value":"child","parent":{"value":"parent-1"}})
        );
    }

    #[test]
    fn launch_session_prepends_command_to_arguments() {
        let id = ContainerId::nested(parent(), "c");
        let args = vec!["-c".to_string(), "echo hi".to_string()];
        let call = launch_nested_container_session(&id, "sh", &args, None);
        let session = &call["launch_nested_container_session"];
        assert_eq!(session["command"]["value"], "sh");
        assert_eq!(session["command"]["arguments"], json!(["sh", "-c", "echo hi"]));
        assert_eq!(session["command"]["shell"], false);
        assert!(session.get("container").is_none());
    }

    #[test]
    fn launch_session_with_tty_carries_window_size() {
        let id = ContainerId::nested(parent(), "c");
        let call = launch_nested_container_session(
            &id,
            "bash",
            &[],
            Some(WindowSize { rows: 24, columns: 80 }),
        );
        let container = &call["launch_nested_container_session"]["container"];
        assert_eq!(container["type"], "MESOS");
        assert_eq!(
            container["tty_info"]["window_size"],
            json!({"rows":24,"columns":80})
        );
    }

    #[test]
    fn wait_call_depends_on_nesting() {
        assert_eq!(wait_container(&parent())["type"], "WAIT_CONTAINER");
        let nested = ContainerId::nested(parent(), "c");
        assert_eq!(wait_container(&nested)["type"], "WAIT_NESTED_CONTAINER");
    }

    #[test]
    fn exit_status_extraction() {
        let resp = json!({"type":"WAIT_NESTED_CONTAINER","wait_nested_container":{"exit_status":256}});
        assert_eq!(exit_status(&resp), Some(256));
        let resp = json!({"type":"WAIT_CONTAINER","wait_container":{}});
        assert_eq!(exit_status(&resp), None);
    }

    #[test]
    fn stdin_data_is_base64() {
        let rec = stdin_data(b"ls\n");
        let io = &rec["attach_container_input"]["process_io"];
        assert_eq!(io["type"], "DATA");
        assert_eq!(io["data"]["type"], "STDIN");
        assert_eq!(io["data"]["data"], "bHMK");
        assert_eq!(stdin_data(b"")["attach_container_input"]["process_io"]["data"]["data"], "");
    }

    #[test]
    fn heartbeat_interval_in_nanoseconds() {
        let rec = heartbeat(Duration::from_secs(30));
        assert_eq!(
            rec["attach_container_input"]["process_io"]["control"]["heartbeat"]["interval"]["nanoseconds"],
            30_000_000_000i64
        );
    }

    #[test]
    fn decode_stdout_and_stderr() {
        let out = br#"{"type":"DATA","data":{"type":"STDOUT","data":"aGk="}}"#;
        assert_eq!(
            decode_process_output(out).unwrap(),
            ProcessOutput::Stdout(b"hi".to_vec())
        );
        let err = br#"{"type":"DATA","data":{"type":"STDERR","data":""}}"#;
        assert_eq!(
            decode_process_output(err).unwrap(),
            ProcessOutput::Stderr(Vec::new())
        );
        let ctl = br#"{"type":"CONTROL","control":{"type":"HEARTBEAT"}}"#;
        assert_eq!(decode_process_output(ctl).unwrap(), ProcessOutput::Control);
    }

    #[test]
    fn decode_rejects_unknown_record() {
        assert!(decode_process_output(br#"{"type":"NOPE"}"#).is_err());
        assert!(decode_process_output(b"not json").is_err());
    }
}
