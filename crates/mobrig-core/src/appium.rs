//! Appium server process control.
//!
//! This module starts the Appium launcher as a child process, waits until it
//! logs `started on <host>:<port>`, and stops running servers found in the
//! process table.
//!
//! Only loopback-style bind addresses are supported. A remote Appium server is
//! not something this crate can start or stop, so any other hostname is
//! rejected before a process is spawned.
//!
//! # Example
//!
//! ```no_run
//! use mobrig_core::appium::{AppiumConfig, AppiumServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = AppiumServer::start(&AppiumConfig::default()).await?;
//! println!("Appium listening on {}", server.endpoint());
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandError, CommandRunner};
use crate::host::HostOs;
use crate::process::{find_by_cmdline, kill_pid, ProcessInfo, ProcessTable};

/// Hostnames the server may bind to.
pub const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "0.0.0.0", "127.0.0.1"];

/// Appium's default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Appium's default port.
pub const DEFAULT_PORT: u16 = 4723;

const STARTED_MARKER: &str = "started on ";

/// Errors from Appium server control.
#[derive(Error, Debug)]
pub enum AppiumError {
    /// The requested bind address is not a loopback-style host.
    #[error("external Appium server is not supported: {0} (use localhost, 0.0.0.0 or 127.0.0.1)")]
    ExternalServerUnsupported(String),

    /// The launcher could not be spawned.
    #[error("failed to spawn Appium binary `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The server wrote to stderr before it was ready.
    #[error("Appium server reported an error: {0}")]
    Stderr(String),

    /// Stdout closed before the listener line appeared.
    #[error("Appium server exited before reporting its listener address")]
    ExitedBeforeReady,

    /// The listener line did not appear within the startup timeout.
    #[error("Appium server did not start within {0:?}")]
    StartupTimeout(Duration),

    /// No running process matched the Appium binary.
    #[error("Appium server PID not found (no process matching `{0}`)")]
    PidNotFound(String),

    /// An external command (e.g. the kill) failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// An I/O error occurred on the child's pipes.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a running Appium server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// HTTP base URL for WebDriver requests, e.g. `http://127.0.0.1:4723/wd/hub`.
    ///
    /// A `0.0.0.0` bind address is reached through `127.0.0.1`.
    pub fn base_url(&self, base_path: &str) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        let path = base_path.trim_end_matches('/');
        format!("http://{}:{}{}", host, self.port, path)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How to launch the Appium server.
#[derive(Debug, Clone)]
pub struct AppiumConfig {
    /// Bind address; must be one of [`LOOPBACK_HOSTS`].
    pub host: String,
    pub port: u16,
    /// Launcher to execute. Also the string searched for in the process table.
    pub binary: String,
    /// How long to wait for the listener line.
    pub startup_timeout: Duration,
    /// Appended after the fixed flags.
    pub extra_args: Vec<String>,
}

impl Default for AppiumConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            binary: HostOs::current().appium_binary().to_string(),
            startup_timeout: Duration::from_secs(60),
            extra_args: Vec::new(),
        }
    }
}

/// Rejects any host outside [`LOOPBACK_HOSTS`].
pub fn validate_host(host: &str) -> Result<(), AppiumError> {
    if LOOPBACK_HOSTS.contains(&host) {
        Ok(())
    } else {
        Err(AppiumError::ExternalServerUnsupported(host.to_string()))
    }
}

/// Arguments passed to the Appium launcher.
pub fn launch_args(config: &AppiumConfig) -> Vec<String> {
    let mut args = vec![
        "--log-no-colors".to_string(),
        "--address".to_string(),
        config.host.clone(),
        "--port".to_string(),
        config.port.to_string(),
        "--show-ios-log".to_string(),
    ];
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Extracts the endpoint from a `... started on <host>:<port>` log line.
pub fn parse_started_line(line: &str) -> Option<ServerEndpoint> {
    let (_, rest) = line.split_once(STARTED_MARKER)?;
    let addr = rest.split_whitespace().next()?;
    let addr = addr
        .strip_prefix("http://")
        .or_else(|| addr.strip_prefix("https://"))
        .unwrap_or(addr)
        .trim_end_matches('/');
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some(ServerEndpoint::new(host, port.parse().ok()?))
}

/// Recovers the bind address from a running server's command line.
///
/// Understands `--address`/`-a` and `--port`/`-p` in both `--opt value` and
/// `--opt=value` form. Missing values fall back to Appium's defaults.
pub fn parse_endpoint(cmdline: &str) -> ServerEndpoint {
    let mut host = DEFAULT_HOST.to_string();
    let mut port = DEFAULT_PORT;

    let mut tokens = cmdline.split_whitespace();
    while let Some(token) = tokens.next() {
        let (flag, inline) = match token.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (token, None),
        };
        match flag {
            "--address" | "-a" => {
                if let Some(value) = inline.or_else(|| tokens.next()) {
                    host = value.to_string();
                }
            }
            "--port" | "-p" => {
                if let Some(value) = inline.or_else(|| tokens.next()) {
                    port = value.parse().unwrap_or(port);
                }
            }
            _ => {}
        }
    }

    ServerEndpoint::new(host, port)
}

/// Reads server output until the listener line appears.
///
/// Resolves with the endpoint from the first stdout line containing
/// `started on <host>:<port>`. Any stderr line fails immediately, as does
/// stdout closing first.
pub async fn wait_for_listener<O, E>(
    stdout: &mut Lines<O>,
    stderr: &mut Lines<E>,
) -> Result<ServerEndpoint, AppiumError>
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut stderr_open = true;
    loop {
        tokio::select! {
            biased;

            line = stderr.next_line(), if stderr_open => match line? {
                Some(line) => return Err(AppiumError::Stderr(line)),
                None => stderr_open = false,
            },
            line = stdout.next_line() => match line? {
                Some(line) => {
                    debug!(target: "appium", "{line}");
                    if let Some(endpoint) = parse_started_line(&line) {
                        return Ok(endpoint);
                    }
                }
                None => return Err(AppiumError::ExitedBeforeReady),
            },
        }
    }
}

/// A running Appium server owned by this process.
///
/// The child is killed when the handle is dropped.
pub struct AppiumServer {
    child: Child,
    endpoint: ServerEndpoint,
}

impl AppiumServer {
    /// Spawns the server and waits for it to report its listener.
    #[instrument(skip_all, fields(host = %config.host, port = config.port))]
    pub async fn start(config: &AppiumConfig) -> Result<Self, AppiumError> {
        validate_host(&config.host)?;

        let args = launch_args(config);
        info!(binary = %config.binary, ?args, "starting Appium server");

        let mut child = Command::new(&config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AppiumError::Spawn {
                binary: config.binary.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(AppiumError::ExitedBeforeReady);
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let endpoint = tokio::time::timeout(
            config.startup_timeout,
            wait_for_listener(&mut stdout, &mut stderr),
        )
        .await
        .map_err(|_| AppiumError::StartupTimeout(config.startup_timeout))??;

        tokio::spawn(drain_output(stdout, stderr));

        info!(%endpoint, pid = ?child.id(), "Appium server started");
        Ok(Self { child, endpoint })
    }

    /// The address the server reported when it came up.
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kills the server and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<(), AppiumError> {
        info!(endpoint = %self.endpoint, "stopping Appium server");
        self.child.kill().await?;
        Ok(())
    }
}

async fn drain_output<O, E>(mut stdout: Lines<O>, mut stderr: Lines<E>)
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => debug!(target: "appium", "{line}"),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => warn!(target: "appium", "{line}"),
                _ => stderr_open = false,
            },
        }
    }
}

/// Finds a running Appium server and the endpoint it was launched with.
pub fn discover_running(
    table: &dyn ProcessTable,
    binary: &str,
) -> Result<(ProcessInfo, ServerEndpoint), AppiumError> {
    let process =
        find_by_cmdline(table, binary).ok_or_else(|| AppiumError::PidNotFound(binary.to_string()))?;
    let endpoint = parse_endpoint(&process.cmdline);
    debug!(pid = process.pid, %endpoint, "found running Appium server");
    Ok((process, endpoint))
}

/// Kills the Appium server found in the process table.
pub async fn stop_running(
    table: &dyn ProcessTable,
    runner: &dyn CommandRunner,
    host: HostOs,
    binary: &str,
) -> Result<u32, AppiumError> {
    let process =
        find_by_cmdline(table, binary).ok_or_else(|| AppiumError::PidNotFound(binary.to_string()))?;
    kill_pid(runner, host, process.pid).await?;
    info!(pid = process.pid, "Appium server stopped");
    Ok(process.pid)
}
