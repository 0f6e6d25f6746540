//! External process execution
//!
//! Pipelines describe what to run as a [`CommandSpec`] and hand it to a
//! [`CommandRunner`]. Output lines from stdout and stderr are merged into one
//! channel in arrival order.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::AgentError;

/// Argument vector plus working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Run `script` with `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human readable form for logs
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Final status of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn into_result(self, what: &str) -> Result<(), AgentError> {
        if self.success() {
            Ok(())
        } else {
            Err(AgentError::ProcessError(format!(
                "{} exited with {}",
                what,
                self.code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )))
        }
    }
}

/// Executes commands, streaming merged output lines to `lines`
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns once the process has exited and every output line was sent
    async fn run(
        &self,
        spec: &CommandSpec,
        lines: mpsc::Sender<String>,
    ) -> Result<ExitOutcome, AgentError>;
}

/// Runs commands as local OS processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

fn spawn_reader<R>(stream: R, lines: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if lines.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read process output: {}", e);
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        lines: mpsc::Sender<String>,
    ) -> Result<ExitOutcome, AgentError> {
        debug!("Running: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::ProcessError(format!("failed to spawn {}: {}", spec.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::ProcessError("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::ProcessError("no stderr handle".to_string()))?;

        let readers = [
            spawn_reader(stdout, lines.clone()),
            spawn_reader(stderr, lines),
        ];

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("Killing {} after {:?}", spec.program, limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {}: {}", spec.program, e);
                    }
                    for reader in readers {
                        reader.abort();
                    }
                    return Err(AgentError::ProcessTimeout(limit));
                }
            },
            None => child.wait().await?,
        };

        for reader in readers {
            if let Err(e) = reader.await {
                warn!("Output reader for {} failed: {}", spec.program, e);
            }
        }

        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}

/// Quote a value for safe interpolation into a POSIX shell script
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
