/*!
container_io.rs - attach / exec sessions against a task's container.

Flow (both commands):
  1. Open the output stream (ATTACH_CONTAINER_OUTPUT or
     LAUNCH_NESTED_CONTAINER_SESSION) and wait for the response headers.
  2. Optionally open ATTACH_CONTAINER_INPUT with a RecordIO body fed by:
       - local stdin (DATA/STDIN, empty record on EOF)
       - a 30s heartbeat (CONTROL/HEARTBEAT)
       - SIGWINCH (CONTROL/TTY_INFO, tty sessions only)
  3. Copy output records to local stdout / stderr until the stream ends,
     the input call fails, or the operator types the detach sequence.
  4. Restore the terminal, then wait on the container for its exit status.

Each session runs on a Tokio runtime owned by the `ContainerIO` value; the
command layer stays synchronous.
*/

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Runtime;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::messages::{self, ContainerId, ProcessOutput, WindowSize};
use super::recordio;
use super::terminal::{self, DetachScanner, RawModeGuard, Scan};
use super::{AgentAddress, AgentClient, ClientSettings, TaskInfo};
use crate::cmd::shared::{Backend, ContainerIo};
use crate::utils::exit_code_from_status;
use crate::{log_debug, log_error, log_info, log_trace};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INPUT_QUEUE_DEPTH: usize = 64;
const STDIN_CHUNK: usize = 4096;
const FALLBACK_WINDOW: WindowSize = WindowSize {
    rows: 24,
    columns: 80,
};

type Record = std::result::Result<Vec<u8>, std::io::Error>;

fn new_runtime() -> Result<Runtime> {
    Runtime::new().context("Failed to create Tokio runtime")
}

/* ---- Backend ---- */

/// Production collaborators: everything goes to a live agent.
#[derive(Debug, Clone, Default)]
pub struct MesosBackend {
    settings: ClientSettings,
}

impl MesosBackend {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Backend for MesosBackend {
    fn container_io(&self, agent: &AgentAddress, task_id: &str) -> Result<Box<dyn ContainerIo>> {
        Ok(Box::new(ContainerIO::connect(agent, task_id, &self.settings)?))
    }

    fn get_containers(&self, agent: &AgentAddress, all: bool) -> Result<Vec<Value>> {
        let rt = new_runtime()?;
        let client = AgentClient::new(agent, &self.settings)?;
        let containers = rt.block_on(client.get_containers(all))?;
        log_debug!("agent '{agent}' reported {} container(s)", containers.len());
        Ok(containers)
    }
}

/* ---- ContainerIO ---- */

/// Streams stdio between this process and a task's container.
pub struct ContainerIO {
    runtime: Option<Runtime>,
    client: AgentClient,
    task: TaskInfo,
}

impl ContainerIO {
    /// Resolve `task_id` on the agent and prepare a client for it.
    pub fn connect(agent: &AgentAddress, task_id: &str, settings: &ClientSettings) -> Result<Self> {
        let runtime = new_runtime()?;
        let client = AgentClient::new(agent, settings)?;
        let task = runtime.block_on(client.find_task(task_id))?;
        log_debug!(
            "task '{}' runs in container {} (tty={})",
            task.task_id,
            task.container_id,
            task.tty
        );
        Ok(Self {
            runtime: Some(runtime),
            client,
            task,
        })
    }

    fn run(&self, session: Session) -> Result<i32> {
        let rt = self
            .runtime
            .as_ref()
            .ok_or_else(|| anyhow!("container I/O runtime already shut down"))?;
        let mut stdout = std::io::stdout();
        let mut stderr = std::io::stderr();
        let stdio = LocalStdio {
            stdin: tokio::io::stdin(),
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        match rt.block_on(run_session(&self.client, session, stdio))? {
            Outcome::Detached => Ok(0),
            Outcome::Exited(status) => {
                log_debug!("container exited with status {status:?}");
                Ok(exit_code_from_status(status))
            }
        }
    }
}

impl ContainerIo for ContainerIO {
    fn attach(&mut self, no_stdin: bool) -> Result<i32> {
        let id = self.task.container_id.clone();
        log_debug!("attaching to container {id} (stdin={})", !no_stdin);
        self.run(Session {
            output_call: messages::attach_container_output(&id),
            input: (!no_stdin).then(|| id.clone()),
            tty: self.task.tty,
            detachable: true,
            wait_on: id,
        })
    }

    fn exec(&mut self, command: &str, args: &[String], interactive: bool, tty: bool) -> Result<i32> {
        let id = ContainerId::nested(self.task.container_id.clone(), Uuid::new_v4().to_string());
        let window = tty.then(|| terminal::window_size().unwrap_or(FALLBACK_WINDOW));
        log_debug!(
            "launching `{}` in nested container {id}",
            shell_words::join(std::iter::once(command).chain(args.iter().map(String::as_str)))
        );
        self.run(Session {
            output_call: messages::launch_nested_container_session(&id, command, args, window),
            input: interactive.then(|| id.clone()),
            tty,
            detachable: false,
            wait_on: id,
        })
    }
}

impl Drop for ContainerIO {
    fn drop(&mut self) {
        // The stdin reader sits in a blocking read that would stall a normal shutdown.
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

/* ---- Session ---- */

struct Session {
    output_call: Value,
    /// Container to stream stdin into, if any.
    input: Option<ContainerId>,
    tty: bool,
    detachable: bool,
    wait_on: ContainerId,
}

/// Local ends of a session's stdio.
struct LocalStdio<'a, R> {
    stdin: R,
    stdout: &'a mut dyn Write,
    stderr: &'a mut dyn Write,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Detached,
    Exited(Option<i32>),
}

enum Ended {
    Output,
    Detached,
}

async fn run_session<R>(
    client: &AgentClient,
    session: Session,
    stdio: LocalStdio<'_, R>,
) -> Result<Outcome>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let LocalStdio {
        stdin,
        stdout,
        stderr,
    } = stdio;
    let raw_mode = if session.tty && terminal::stdin_is_tty() {
        Some(RawModeGuard::enable()?)
    } else {
        None
    };

    let response = client.stream_output(&session.output_call).await?;

    let (detach_tx, mut detach_rx) = oneshot::channel::<()>();
    let mut helpers: Vec<JoinHandle<()>> = Vec::new();
    let mut input_call: JoinHandle<Result<()>> = match &session.input {
        Some(id) => {
            let detach = session.detachable.then_some(detach_tx);
            start_input(client, id, stdin, session.tty, detach, &mut helpers).await?
        }
        None => {
            drop(detach_tx);
            tokio::spawn(std::future::pending::<Result<()>>())
        }
    };

    let output = pump_output(response, stdout, stderr);
    tokio::pin!(output);
    let mut input_open = session.input.is_some();
    let mut detach_open = true;

    let ended = loop {
        tokio::select! {
            res = &mut output => break res.map(|()| Ended::Output),
            res = &mut detach_rx, if detach_open => {
                detach_open = false;
                if res.is_ok() {
                    break Ok(Ended::Detached);
                }
            }
            joined = &mut input_call, if input_open => {
                input_open = false;
                match joined {
                    Ok(Ok(())) => log_trace!("input stream closed by agent"),
                    Ok(Err(e)) => break Err(e),
                    Err(e) => break Err(anyhow!("input stream task failed: {e}")),
                }
            }
        }
    };

    input_call.abort();
    for helper in &helpers {
        helper.abort();
    }
    drop(raw_mode);

    match ended? {
        Ended::Detached => {
            log_info!("detached from container {}", session.wait_on);
            Ok(Outcome::Detached)
        }
        Ended::Output => {
            let status = client.wait(&session.wait_on).await?;
            Ok(Outcome::Exited(status))
        }
    }
}

/// Open ATTACH_CONTAINER_INPUT and spawn everything that feeds it.
async fn start_input<R>(
    client: &AgentClient,
    id: &ContainerId,
    stdin: R,
    tty: bool,
    detach: Option<oneshot::Sender<()>>,
    helpers: &mut Vec<JoinHandle<()>>,
) -> Result<JoinHandle<Result<()>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Record>(INPUT_QUEUE_DEPTH);

    // CONTAINER_ID must be the first record on the stream.
    send(&tx, &messages::attach_input_container_id(id)).await?;
    if tty {
        if let Some(size) = terminal::window_size() {
            send(&tx, &messages::tty_info(size)).await?;
        }
    }

    let input_client = client.clone();
    let input_call = tokio::spawn(async move {
        let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
        input_client.stream_input(body).await
    });

    helpers.push(tokio::spawn(pump_stdin(stdin, tx.clone(), detach)));
    helpers.push(tokio::spawn(heartbeat(tx.clone())));
    if tty {
        helpers.push(tokio::spawn(forward_resizes(tx)));
    }
    Ok(input_call)
}

async fn send(tx: &mpsc::Sender<Record>, message: &Value) -> Result<()> {
    let record = recordio::encode_json(message)?;
    tx.send(Ok(record))
        .await
        .map_err(|_| anyhow!("input stream already closed"))
}

async fn pump_output(
    mut response: reqwest::Response,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let mut decoder = recordio::Decoder::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .context("output stream interrupted")?
    {
        for record in decoder.decode(&chunk)? {
            match messages::decode_process_output(&record)? {
                ProcessOutput::Stdout(data) => write_flush(stdout, &data)?,
                ProcessOutput::Stderr(data) => write_flush(stderr, &data)?,
                ProcessOutput::Control => log_trace!("control record on output stream"),
            }
        }
    }
    if !decoder.is_idle() {
        log_debug!("output stream ended in the middle of a record");
    }
    Ok(())
}

fn write_flush(out: &mut dyn Write, data: &[u8]) -> Result<()> {
    out.write_all(data)?;
    out.flush()?;
    Ok(())
}

async fn pump_stdin<R>(mut stdin: R, tx: mpsc::Sender<Record>, detach: Option<oneshot::Sender<()>>)
where
    R: AsyncRead + Unpin,
{
    let mut scanner = detach.as_ref().map(|_| DetachScanner::default());
    let mut buf = vec![0u8; STDIN_CHUNK];

    loop {
        let n = match stdin.read(&mut buf).await {
            Ok(0) => {
                log_trace!("stdin reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                log_error!("reading stdin failed: {e}");
                break;
            }
        };

        let (data, detached) = match scanner.as_mut() {
            Some(s) => match s.feed(&buf[..n]) {
                Scan::Forward(d) => (d, false),
                Scan::Detach(d) => (d, true),
            },
            None => (buf[..n].to_vec(), false),
        };

        // An empty STDIN record means EOF, so never send one for plain input.
        if !data.is_empty() && send(&tx, &messages::stdin_data(&data)).await.is_err() {
            return;
        }
        if detached {
            if let Some(d) = detach {
                let _ = d.send(());
            }
            return;
        }
    }

    // A CTRL-p held back at EOF is plain input.
    let held = scanner.as_mut().map(DetachScanner::flush).unwrap_or_default();
    if !held.is_empty() && send(&tx, &messages::stdin_data(&held)).await.is_err() {
        return;
    }
    let _ = send(&tx, &messages::stdin_data(&[])).await;
}

async fn heartbeat(tx: mpsc::Sender<Record>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if send(&tx, &messages::heartbeat(HEARTBEAT_INTERVAL))
            .await
            .is_err()
        {
            return;
        }
        log_trace!("heartbeat sent");
    }
}

async fn forward_resizes(tx: mpsc::Sender<Record>) {
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(s) => s,
        Err(e) => {
            log_debug!("window resize tracking unavailable: {e}");
            return;
        }
    };
    while winch.recv().await.is_some() {
        if let Some(size) = terminal::window_size() {
            if send(&tx, &messages::tty_info(size)).await.is_err() {
                return;
            }
        }
    }
}
