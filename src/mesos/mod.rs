//! Agent addressing and the v1 operator API client.
//!
//! parse_agent_address -> AgentAddress (sanitized http/https URL)
//! AgentClient: GET_CONTAINERS / GET_TASKS / WAIT_* plus the streaming
//! calls used by `ContainerIO` (see `container_io.rs`).
//!
use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

pub mod container_io;
#[cfg(test)]
mod fake_agent;
pub mod messages;
pub mod recordio;
pub mod terminal;

pub use container_io::MesosBackend;
use messages::ContainerId;

/* ---- Addressing ---- */

/// A sanitized agent address. Keeps the user's spelling for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAddress {
    original: String,
    url: Url,
}

impl AgentAddress {
    pub fn original(&self) -> &str {
        &self.original
    }

    /// `<agent>/api/v1`, the operator API endpoint.
    pub fn api_url(&self) -> Result<Url> {
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("api/v1")
            .with_context(|| format!("Failed to build API URL for agent '{}'", self.original))
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Parse an agent address the way operators usually type it.
///
/// - "10.0.0.5:5051"             -> http://10.0.0.5:5051/
/// - "https://agent.example:5051" -> kept as-is
/// - "ftp://agent"               -> rejected (only http/https)
pub fn parse_agent_address(raw: &str) -> Result<AgentAddress> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("Agent address is empty");
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&candidate)
        .with_context(|| format!("Invalid agent address: '{trimmed}'"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("Unsupported scheme '{other}' in agent address '{trimmed}'"),
    }
    if url.host_str().is_none_or(|h| h.is_empty()) {
        bail!("Agent address '{trimmed}' has no host");
    }

    Ok(AgentAddress {
        original: trimmed.to_string(),
        url,
    })
}

/* ---- Client ---- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

/// Knobs for talking to the agent (derived from config).
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub ssl_verify: bool,
    pub credentials: Option<Credentials>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            ssl_verify: true,
            credentials: None,
        }
    }
}

/// Thin wrapper over `reqwest` for the agent's `/api/v1` endpoint.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    api_url: Url,
    agent: AgentAddress,
    settings: ClientSettings,
}

impl AgentClient {
    pub fn new(agent: &AgentAddress, settings: &ClientSettings) -> Result<Self> {
        Self::with_builder(agent, settings, reqwest::Client::builder())
    }

    fn with_builder(
        agent: &AgentAddress,
        settings: &ClientSettings,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self> {
        let http = builder
            .connect_timeout(settings.timeout)
            .danger_accept_invalid_certs(!settings.ssl_verify)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: agent.api_url()?,
            agent: agent.clone(),
            settings: settings.clone(),
        })
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let req = self.http.post(self.api_url.clone());
        match &self.settings.credentials {
            Some(c) => req.basic_auth(&c.principal, Some(&c.secret)),
            None => req,
        }
    }

    /// Non-streaming call with a JSON request and a JSON response.
    pub async fn call(&self, call: &Value) -> Result<Value> {
        let call_type = call_type(call);
        crate::log_debug!("POST {} ({call_type})", self.api_url);
        let resp = self
            .post()
            .timeout(self.settings.timeout)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(call)
            .send()
            .await
            .with_context(|| format!("{call_type} request to agent '{}' failed", self.agent))?;
        let resp = check_status(resp, call_type).await?;
        resp.json::<Value>()
            .await
            .with_context(|| format!("Failed to decode {call_type} response"))
    }

    /// Open a streaming-output call; resolves once the response headers arrive.
    pub async fn stream_output(&self, call: &Value) -> Result<reqwest::Response> {
        let call_type = call_type(call);
        crate::log_debug!("POST {} ({call_type}, streaming output)", self.api_url);
        let resp = self
            .post()
            .header(reqwest::header::ACCEPT, "application/recordio")
            .header("Message-Accept", "application/json")
            .json(call)
            .send()
            .await
            .with_context(|| format!("{call_type} request to agent '{}' failed", self.agent))?;
        check_status(resp, call_type).await
    }

    /// Send a streaming-input call (ATTACH_CONTAINER_INPUT) whose body is
    /// a RecordIO stream of JSON calls.
    pub async fn stream_input(&self, body: reqwest::Body) -> Result<()> {
        crate::log_debug!("POST {} (ATTACH_CONTAINER_INPUT, streaming input)", self.api_url);
        let resp = self
            .post()
            .header(reqwest::header::CONTENT_TYPE, "application/recordio")
            .header("Message-Content-Type", "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("ATTACH_CONTAINER_INPUT to agent '{}' failed", self.agent))?;
        check_status(resp, "ATTACH_CONTAINER_INPUT").await?;
        Ok(())
    }

    /// Raw container records from GET_CONTAINERS.
    pub async fn get_containers(&self, all: bool) -> Result<Vec<Value>> {
        let resp = self.call(&messages::get_containers(all)).await?;
        Ok(resp
            .get("get_containers")
            .and_then(|g| g.get("containers"))
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn find_task(&self, task_id: &str) -> Result<TaskInfo> {
        let resp = self.call(&messages::get_tasks()).await?;
        locate_task(&resp, task_id)
    }

    /// Block until the container exits; returns the waitpid-style status.
    pub async fn wait(&self, id: &ContainerId) -> Result<Option<i32>> {
        let call = messages::wait_container(id);
        let call_type = call_type(&call);
        // Waiting may legitimately outlive the request timeout.
        let resp = self
            .post()
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&call)
            .send()
            .await
            .with_context(|| format!("{call_type} request for container '{id}' failed"))?;
        let resp = check_status(resp, call_type).await?;
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("Failed to decode {call_type} response"))?;
        Ok(messages::exit_status(&body))
    }
}

fn call_type(call: &Value) -> &str {
    call.get("type").and_then(|t| t.as_str()).unwrap_or("UNKNOWN")
}

async fn check_status(resp: reqwest::Response, call_type: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        bail!("{call_type} failed with HTTP {status}");
    }
    bail!("{call_type} failed with HTTP {status}: {body}")
}

/* ---- Task lookup ---- */

/// What ContainerIO needs to know about a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: String,
    pub container_id: ContainerId,
    /// The task container was launched with a TTY.
    pub tty: bool,
}

/// Find exactly one task named `task_id` in a GET_TASKS response.
pub fn locate_task(response: &Value, task_id: &str) -> Result<TaskInfo> {
    let get_tasks = response
        .get("get_tasks")
        .ok_or_else(|| anyhow!("GET_TASKS response has no 'get_tasks' field"))?;

    let matches: Vec<&Value> = ["launched_tasks", "queued_tasks", "completed_tasks"]
        .iter()
        .filter_map(|key| get_tasks.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter(|t| {
            t.get("task_id")
                .and_then(|id| id.get("value"))
                .and_then(|v| v.as_str())
                == Some(task_id)
        })
        .collect();

    let task = match matches.as_slice() {
        [] => bail!("Unable to find task '{task_id}'"),
        [one] => *one,
        _ => bail!("Multiple tasks with id '{task_id}'"),
    };

    let container = task.get("container");
    let container_type = container
        .and_then(|c| c.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or("MESOS");
    if container_type != "MESOS" {
        bail!(
            "This command is only supported for tasks launched by the Universal Container Runtime (UCR)."
        );
    }
    let tty = container.and_then(|c| c.get("tty_info")).is_some();

    let container_id = task
        .get("statuses")
        .and_then(|s| s.as_array())
        .into_iter()
        .flatten()
        .rev()
        .find_map(|status| {
            status
                .get("container_status")
                .and_then(|cs| cs.get("container_id"))
        })
        .ok_or_else(|| anyhow!("Task '{task_id}' has no container id"))?;
    let container_id: ContainerId = serde_json::from_value(container_id.clone())
        .with_context(|| format!("Task '{task_id}' has a malformed container id"))?;

    Ok(TaskInfo {
        task_id: task_id.to_string(),
        container_id,
        tty,
    })
}
