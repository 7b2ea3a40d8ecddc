//! A minimal HTTP/1.1 agent on 127.0.0.1 for exercising `AgentClient` and
//! the session loop end to end.
//!
//! Plain calls are answered by a handler keyed on the call. Requests with a
//! `application/recordio` body are treated as ATTACH_CONTAINER_INPUT: their
//! chunked body is decoded record by record until the client goes away.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use super::{AgentAddress, AgentClient, ClientSettings, parse_agent_address, recordio};

pub enum Reply {
    /// Complete response with this status and body.
    Body(u16, String),
    /// RecordIO output stream. With `after_input` the records are written
    /// only once an input record has arrived.
    Stream {
        records: Vec<Value>,
        after_input: bool,
    },
    /// Headers only; the stream stays open.
    Hold,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Reply::Body(200, body.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub call_type: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

type Handler = dyn Fn(&Request) -> Reply + Send + Sync;

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<Request>>,
    input: Mutex<Vec<Value>>,
    input_seen: Notify,
}

pub struct FakeAgent {
    address: AgentAddress,
    shared: Arc<Shared>,
}

impl FakeAgent {
    pub async fn start(handler: impl Fn(&Request) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let handler: Arc<Handler> = Arc::new(handler);

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_shared.clone(), handler.clone()));
            }
        });

        Self {
            address: parse_agent_address(&addr.to_string()).unwrap(),
            shared,
        }
    }

    pub fn client(&self, settings: &ClientSettings) -> AgentClient {
        let builder = reqwest::Client::builder().no_proxy();
        AgentClient::with_builder(&self.address, settings, builder).unwrap()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn call_types(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.call_type).collect()
    }

    pub fn request(&self, call_type: &str) -> Request {
        self.requests()
            .into_iter()
            .find(|r| r.call_type == call_type)
            .unwrap_or_else(|| panic!("no {call_type} request received"))
    }

    pub fn input_records(&self) -> Vec<Value> {
        self.shared.input.lock().unwrap().clone()
    }
}

/// A STDOUT/STDERR ProcessIO record as the agent streams it.
pub fn output_record(kind: &str, data: &[u8]) -> Value {
    json!({
        "type": "DATA",
        "data": { "type": kind, "data": BASE64.encode(data) }
    })
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, handler: Arc<Handler>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let Some(headers) = read_head(&mut reader).await else {
        return;
    };

    if headers.get("content-type").map(String::as_str) == Some("application/recordio") {
        shared.requests.lock().unwrap().push(Request {
            call_type: "ATTACH_CONTAINER_INPUT".into(),
            headers,
            body: Value::Null,
        });
        read_input(&mut reader, &shared).await;
        let _ = respond(&mut write, 200, "").await;
        return;
    }

    let len = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut raw = vec![0u8; len];
    if reader.read_exact(&mut raw).await.is_err() {
        return;
    }
    let body: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);
    let request = Request {
        call_type: body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        headers,
        body,
    };
    shared.requests.lock().unwrap().push(request.clone());

    match handler(&request) {
        Reply::Body(status, text) => {
            let _ = respond(&mut write, status, &text).await;
        }
        Reply::Stream {
            records,
            after_input,
        } => {
            if stream_head(&mut write).await.is_err() {
                return;
            }
            if after_input {
                shared.input_seen.notified().await;
            }
            let mut payload = Vec::new();
            for record in &records {
                payload.extend(recordio::encode_json(record).unwrap());
            }
            let mut out = Vec::new();
            if !payload.is_empty() {
                out.extend(format!("{:x}\r\n", payload.len()).into_bytes());
                out.extend(payload);
                out.extend(b"\r\n");
            }
            out.extend(b"0\r\n\r\n");
            let _ = write.write_all(&out).await;
            let _ = write.shutdown().await;
        }
        Reply::Hold => {
            if stream_head(&mut write).await.is_ok() {
                std::future::pending::<()>().await;
            }
        }
    }
}

async fn read_head(reader: &mut BufReader<OwnedReadHalf>) -> Option<HashMap<String, String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut headers = HashMap::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return Some(headers);
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
}

async fn read_input(reader: &mut BufReader<OwnedReadHalf>, shared: &Shared) {
    let mut decoder = recordio::Decoder::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let Ok(size) = usize::from_str_radix(line.trim(), 16) else {
            return;
        };
        if size == 0 {
            return;
        }
        let mut chunk = vec![0u8; size + 2];
        if reader.read_exact(&mut chunk).await.is_err() {
            return;
        }
        chunk.truncate(size);
        let Ok(records) = decoder.decode(&chunk) else {
            return;
        };
        for record in records {
            let value = serde_json::from_slice(&record).unwrap_or(Value::Null);
            shared.input.lock().unwrap().push(value);
            shared.input_seen.notify_one();
        }
    }
}

async fn respond(write: &mut OwnedWriteHalf, status: u16, body: &str) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    write.write_all(head.as_bytes()).await?;
    write.write_all(body.as_bytes()).await?;
    write.shutdown().await
}

async fn stream_head(write: &mut OwnedWriteHalf) -> std::io::Result<()> {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/recordio\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    write.write_all(head.as_bytes()).await?;
    write.flush().await
}
