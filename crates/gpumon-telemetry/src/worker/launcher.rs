use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::TelemetryConfig;

/// A running collector as seen by the worker: something to wait on and kill.
#[async_trait]
pub trait CollectorProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Resolves with the exit code (`None` when terminated by a signal).
    /// Must be cancel safe.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    fn start_kill(&mut self) -> io::Result<()>;
}

pub struct LaunchedCollector {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn CollectorProcess>,
}

/// Spawns a collector subprocess with piped stdin/stdout.
pub trait CollectorLauncher: Send + Sync {
    fn launch(&self) -> io::Result<LaunchedCollector>;

    fn describe(&self) -> String {
        "collector".to_string()
    }
}

pub struct CommandLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.collector_command.clone(), config.collector_args.clone())
    }
}

impl CollectorLauncher for CommandLauncher {
    fn launch(&self) -> io::Result<LaunchedCollector> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "collector stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "collector stdout not piped"))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("collector[{:?}] stderr: {}", pid, line);
                }
            });
        }

        Ok(LaunchedCollector {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Box::new(ChildProcess { child }),
        })
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.command.display().to_string()
        } else {
            format!("{} {}", self.command.display(), self.args.join(" "))
        }
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl CollectorProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    fn start_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            // Already reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}
