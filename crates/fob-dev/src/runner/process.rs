//! Node worker processes.
//!
//! Messages to the worker are JSON lines on its stdin. The worker answers
//! with stdout lines prefixed by [`MESSAGE_PREFIX`]; every other line is log
//! output.

use super::{LaunchedWorker, WorkerEvent, WorkerLauncher, WorkerProcess, WorkerSpec};
use crate::error::{DevError, Result};
use async_trait::async_trait;
use fob_hmr::HmrMessage;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Set in the worker's environment so its runtime knows it is supervised.
pub const WORKER_ENV: &str = "FOB_HMR_WORKER";

/// Marks a stdout line as a message to the runner.
pub const MESSAGE_PREFIX: &str = "@@fob-hmr ";

/// Launches `node --enable-source-maps <entry>`.
#[derive(Debug, Clone)]
pub struct NodeProcessLauncher {
    binary: String,
}

impl NodeProcessLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for NodeProcessLauncher {
    fn default() -> Self {
        Self::new(crate::config::default_node_binary())
    }
}

#[async_trait]
impl WorkerLauncher for NodeProcessLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<LaunchedWorker> {
        let mut child = Command::new(&self.binary)
            .arg("--enable-source-maps")
            .arg(&spec.entry)
            .current_dir(&spec.cwd)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DevError::Worker(format!("Failed to spawn {}: {e}", self.binary)))?;

        let stdin = child.stdin.take().ok_or_else(|| piped("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| piped("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| piped("stderr"))?;

        let (events, rx) = mpsc::unbounded_channel();
        let _ = events.send(WorkerEvent::Online);

        let readers = [
            tokio::spawn(forward_lines(stdout, events.clone(), parse_stdout_line)),
            tokio::spawn(forward_lines(stderr, events.clone(), WorkerEvent::Stderr)),
        ];
        let (kill, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(child, kill_rx, readers, events));

        Ok(LaunchedWorker {
            process: Box::new(NodeProcess {
                stdin,
                kill: Some(kill),
                supervisor: Some(supervisor),
            }),
            events: rx,
        })
    }
}

fn piped(stream: &str) -> DevError {
    DevError::Worker(format!("Worker {stream} is not piped"))
}

struct NodeProcess {
    stdin: ChildStdin,
    kill: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerProcess for NodeProcess {
    async fn post(&mut self, message: &HmrMessage) -> Result<()> {
        let mut line = message.to_json()?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }
}

/// Classify one stdout line.
pub fn parse_stdout_line(line: String) -> WorkerEvent {
    if let Some(json) = line.strip_prefix(MESSAGE_PREFIX) {
        if let Ok(value) = serde_json::from_str(json) {
            return WorkerEvent::Message(value);
        }
    }
    WorkerEvent::Stdout(line)
}

async fn forward_lines<R>(
    stream: R,
    events: UnboundedSender<WorkerEvent>,
    classify: fn(String) -> WorkerEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(classify(line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(WorkerEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

/// Wait for the worker to exit or be killed, then report the exit after
/// all of its output.
async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    readers: [JoinHandle<()>; 2],
    events: UnboundedSender<WorkerEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit kill and when the handle is dropped
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Worker already exited");
            }
            child.wait().await
        }
    };

    for reader in readers {
        let _ = reader.await;
    }

    match status {
        Ok(status) => {
            let _ = events.send(WorkerEvent::Exit(status.code()));
        }
        Err(e) => {
            let _ = events.send(WorkerEvent::Error(e.to_string()));
            let _ = events.send(WorkerEvent::Exit(None));
        }
    }
}
