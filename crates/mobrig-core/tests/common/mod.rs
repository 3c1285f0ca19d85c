//! Shared test helpers for mobrig-core integration tests.
//!
//! Provides a scripted [`CommandRunner`], a fixed process table, an in-memory
//! [`SigningStore`] and a mock WebDriver HTTP server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mobrig_core::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use mobrig_core::process::ProcessInfo;
use mobrig_core::signing::{
    Certificate, CertificateType, ProfileType, ProvisioningProfile, SigningError, SigningStore,
};

// ---------------------------------------------------------------------------
// Scripted command runner
// ---------------------------------------------------------------------------

/// A [`CommandRunner`] that replays queued outputs and records every call.
///
/// Once the queue is empty, `fallback` is returned for every further call.
pub struct ScriptedRunner {
    queue: Mutex<VecDeque<CommandOutput>>,
    fallback: CommandOutput,
    calls: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(outputs: Vec<CommandOutput>, fallback: CommandOutput) -> Self {
        Self {
            queue: Mutex::new(outputs.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Every call succeeds with the given stdout.
    pub fn always(stdout: &str) -> Self {
        Self::new(Vec::new(), CommandOutput::ok(stdout))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        let next = self.queue.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, CommandError> {
        self.spawned.lock().unwrap().push(spec.clone());
        Ok(4242)
    }
}

// ---------------------------------------------------------------------------
// Process table
// ---------------------------------------------------------------------------

pub fn process_table(entries: &[(u32, &str)]) -> Vec<ProcessInfo> {
    entries
        .iter()
        .map(|(pid, cmdline)| ProcessInfo {
            pid: *pid,
            cmdline: cmdline.to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory signing store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pub certificates: Vec<(CertificateType, Certificate)>,
    pub profiles: Vec<ProvisioningProfile>,
    pub calls: Mutex<u32>,
}

impl MemoryStore {
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SigningStore for MemoryStore {
    async fn certificates(&self, kind: CertificateType) -> Result<Vec<Certificate>, SigningError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .certificates
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn profiles(&self, kind: ProfileType) -> Result<Vec<ProvisioningProfile>, SigningError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.profile_type == kind)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Mock WebDriver server
// ---------------------------------------------------------------------------

/// A request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// A canned reply for requests whose path ends with `path_suffix`.
pub struct Route {
    pub method: &'static str,
    pub path_suffix: &'static str,
    pub status: u16,
    pub body: Value,
}

impl Route {
    pub fn new(method: &'static str, path_suffix: &'static str, status: u16, body: Value) -> Self {
        Self {
            method,
            path_suffix,
            status,
            body,
        }
    }
}

/// Starts an HTTP server that answers each connection once using `routes`.
///
/// Unmatched requests get `200 {"value": null}`. Every request is recorded.
pub async fn mock_webdriver(routes: Vec<Route>) -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(routes);

    let log = recorded.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();
            let routes = routes.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, &routes, &log).await;
            });
        }
    });

    (addr, recorded)
}

async fn serve_one(
    mut stream: TcpStream,
    routes: &[Route],
    log: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = (header_end + content_length).min(buf.len());
    let body = serde_json::from_slice(&buf[header_end..body_end]).unwrap_or(Value::Null);

    log.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        body,
    });

    let (status, reply) = routes
        .iter()
        .find(|r| r.method == method && path.ends_with(r.path_suffix))
        .map(|r| (r.status, r.body.to_string()))
        .unwrap_or((200, r#"{"value":null}"#.to_string()));

    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        if status < 400 { "OK" } else { "Error" },
        reply.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}
