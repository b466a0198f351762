//! Minimal in-process HTTP/1.1 fake server for integration tests: a
//! `tokio::net::TcpListener` plus a hand-rolled response writer, in place
//! of a mocking framework (none of the pack's Cargo.tomls pull one in).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into(), delay: Duration::ZERO }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Routes = Arc<StdMutex<HashMap<String, Vec<ScriptedResponse>>>>;
type Counters = Arc<StdMutex<HashMap<String, usize>>>;
type Calls = Arc<StdMutex<HashMap<String, Vec<(Instant, Value)>>>>;

pub struct FakeHttpServer {
    addr: std::net::SocketAddr,
    routes: Routes,
    counters: Counters,
    calls: Calls,
    _accept_loop: JoinHandle<()>,
}

impl FakeHttpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        let routes: Routes = Arc::new(StdMutex::new(HashMap::new()));
        let counters: Counters = Arc::new(StdMutex::new(HashMap::new()));
        let calls: Calls = Arc::new(StdMutex::new(HashMap::new()));

        let accept_routes = routes.clone();
        let accept_counters = counters.clone();
        let accept_calls = calls.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let routes = accept_routes.clone();
                let counters = accept_counters.clone();
                let calls = accept_calls.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, routes, counters, calls).await;
                });
            }
        });

        Self { addr, routes, counters, calls, _accept_loop: accept_loop }
    }

    pub fn address(&self) -> (String, u16) {
        (self.addr.ip().to_string(), self.addr.port())
    }

    /// Queue the responses a path returns, in order; the last entry repeats
    /// once the queue is exhausted.
    pub fn script(&self, path: &str, responses: Vec<ScriptedResponse>) {
        self.routes.lock().unwrap().insert(path.to_string(), responses);
        self.counters.lock().unwrap().remove(path);
    }

    pub fn call_times(&self, path: &str) -> Vec<Instant> {
        self.calls.lock().unwrap().get(path).map(|v| v.iter().map(|(t, _)| *t).collect()).unwrap_or_default()
    }

    pub fn call_bodies(&self, path: &str) -> Vec<Value> {
        self.calls.lock().unwrap().get(path).cloned().unwrap_or_default().into_iter().map(|(_, b)| b).collect()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).map(Vec::len).unwrap_or(0)
    }
}

async fn serve_one(mut stream: TcpStream, routes: Routes, counters: Counters, calls: Calls) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = v.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }
    let body_value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    calls.lock().unwrap().entry(path.clone()).or_default().push((Instant::now(), body_value));

    let scripted = {
        let routes = routes.lock().unwrap();
        let mut counters = counters.lock().unwrap();
        routes.get(&path).map(|responses| {
            let index = counters.entry(path.clone()).or_insert(0);
            let picked = responses[(*index).min(responses.len() - 1)].clone();
            *index += 1;
            picked
        })
    };
    let response = scripted.unwrap_or_else(|| ScriptedResponse::ok("{}"));

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let rendered = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        reason_phrase(response.status),
        response.body.len(),
        response.body
    );
    write_half.write_all(rendered.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Build a `Service` whose single capability points at `server`, at `path`.
pub fn service_for(server: &FakeHttpServer, agent_name: &str, capability: swarm_kernel::capability::Capability) -> swarm_kernel::capability::Service {
    let (address, port) = server.address();
    swarm_kernel::capability::Service {
        id: agent_name.to_string(),
        name: agent_name.to_string(),
        address,
        port,
        capabilities: vec![capability],
    }
}

pub struct NullLlm;

#[async_trait::async_trait]
impl swarm_kernel::llm::LlmClient for NullLlm {
    async fn generate(&self, _prompt: &str, _options: swarm_kernel::llm::GenerateOptions) -> Result<swarm_kernel::llm::GenerateResponse, swarm_kernel::llm::LlmError> {
        Err(swarm_kernel::llm::LlmError("no llm configured in this test".into()))
    }
}
