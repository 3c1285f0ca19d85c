//! External command execution.
//!
//! Every shell-out in this crate (adb, the emulator binaries, `xcrun`,
//! `security`, `kill`) goes through a [`CommandRunner`]. Production code uses
//! [`SystemRunner`]; tests substitute a scripted runner so that polling and
//! process-control logic can be exercised without the real tools.
//!
//! # Example
//!
//! ```no_run
//! use mobrig_core::command::{CommandRunner, CommandSpec, SystemRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = SystemRunner;
//! let spec = CommandSpec::new("adb").args(["devices"]);
//! let output = runner.output(&spec).await?.into_result(&spec)?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised while running an external command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", describe_exit(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}

/// A program plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Builds a successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a non-zero exit into [`CommandError::Failed`].
    pub fn into_result(self, spec: &CommandSpec) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: spec.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Executes external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion and captures stdout and stderr.
    ///
    /// A non-zero exit is *not* an error at this level; callers decide via
    /// [`CommandOutput::into_result`].
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Starts a long-lived process with its stdio discarded and returns its PID
    /// without waiting for it.
    fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, CommandError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!(command = %spec, "running");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Io {
                command: spec.to_string(),
                source,
            })?;

        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %spec, code = ?output.code, "finished");
        Ok(output)
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, CommandError> {
        debug!(command = %spec, "spawning detached");
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Io {
                command: spec.to_string(),
                source,
            })?;

        // The child keeps running after the handle is dropped.
        Ok(child.id().unwrap_or_default())
    }
}
