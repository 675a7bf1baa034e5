//! Supervision of the Node worker that runs a server-side build.
//!
//! The runner owns at most one worker. Its lifecycle:
//!
//! ```text
//! Absent -> Starting -> Running -> Restarting -> Starting -> ...
//!                 any state -> Stopped (explicit stop)
//! ```
//!
//! A worker is started from the Node-targeted JS entry bundle once a build
//! has finished. With [`WorkerPolicy::LivePatch`] updates are posted to the
//! running worker, which answers each one; a [`RESTART_SENTINEL`] answer
//! escalates to a full restart. With [`WorkerPolicy::RestartOnChange`] every
//! successful build restarts the worker.

pub mod process;

use crate::error::{DevError, Result};
use async_trait::async_trait;
use fob_hmr::{Bundle, HmrMessage, RESTART_SENTINEL, SharedBundleGraph};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

pub use process::NodeProcessLauncher;

/// How a running worker picks up a new build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPolicy {
    /// Updates are applied in place; the worker decides when it must restart
    LivePatch,
    /// Every successful build restarts the worker
    RestartOnChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Absent,
    Starting,
    Running,
    Restarting,
    Stopped,
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub entry: PathBuf,
    pub cwd: PathBuf,
}

/// Output of a worker, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The worker process is up
    Online,
    /// Application message sent by the worker's HMR runtime
    Message(Value),
    Stdout(String),
    Stderr(String),
    Error(String),
    Exit(Option<i32>),
}

/// Handle to a launched worker.
#[async_trait]
pub trait WorkerProcess: Send {
    async fn post(&mut self, message: &HmrMessage) -> Result<()>;

    /// Kill the worker unconditionally and wait for it to exit.
    async fn terminate(&mut self);
}

pub struct LaunchedWorker {
    pub process: Box<dyn WorkerProcess>,
    pub events: UnboundedReceiver<WorkerEvent>,
}

/// Starts worker processes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: &WorkerSpec) -> Result<LaunchedWorker>;
}

#[derive(Debug, Clone)]
pub struct NodeRunnerOptions {
    pub project_root: PathBuf,
    pub policy: WorkerPolicy,
    /// Restart the worker when an update is not answered in time
    pub ack_timeout: Option<Duration>,
}

struct ActiveWorker {
    generation: u64,
    process: Box<dyn WorkerProcess>,
    replies: UnboundedReceiver<Value>,
}

enum Ack {
    Reply(Value),
    /// The worker exited before answering
    Gone,
    TimedOut,
    /// The runner was stopped while waiting
    Stopped,
}

pub struct NodeRunner {
    options: NodeRunnerOptions,
    launcher: Arc<dyn WorkerLauncher>,
    worker: tokio::sync::Mutex<Option<ActiveWorker>>,
    state: parking_lot::Mutex<WorkerState>,
    build_pending: watch::Sender<bool>,
    /// Set once by `stop`; wakes every wait that holds the worker slot
    stopped: watch::Sender<bool>,
    graph: parking_lot::Mutex<Option<SharedBundleGraph>>,
    generation: AtomicU64,
    this: Weak<NodeRunner>,
}

impl NodeRunner {
    pub fn new(options: NodeRunnerOptions, launcher: Arc<dyn WorkerLauncher>) -> Arc<Self> {
        let (build_pending, _) = watch::channel(false);
        let (stopped, _) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            options,
            launcher,
            worker: tokio::sync::Mutex::new(None),
            state: parking_lot::Mutex::new(WorkerState::Absent),
            build_pending,
            stopped,
            graph: parking_lot::Mutex::new(None),
            generation: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub fn options(&self) -> &NodeRunnerOptions {
        &self.options
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn set_state(&self, state: WorkerState) {
        let mut current = self.state.lock();
        tracing::debug!(from = ?*current, to = ?state, "Worker state change");
        *current = state;
    }

    /// Hold worker starts until the running build completes.
    pub fn build_start(&self) {
        self.build_pending.send_replace(true);
    }

    /// Adopt a finished build and bring the worker in line with it.
    pub async fn build_success(&self, bundle_graph: SharedBundleGraph) -> Result<()> {
        *self.graph.lock() = Some(bundle_graph);
        self.build_pending.send_replace(false);

        if self.is_stopped() {
            return Ok(());
        }

        let mut slot = self.worker.lock().await;
        if slot.is_none() {
            return self.start_worker(&mut slot).await;
        }
        match self.options.policy {
            WorkerPolicy::RestartOnChange => self.restart_locked(&mut slot).await,
            WorkerPolicy::LivePatch => Ok(()),
        }
    }

    /// Apply an update to the running worker.
    ///
    /// Reloads restart the worker. Updates are posted and resolve once the
    /// worker answers; a restart answer or a missed deadline restarts it.
    /// Resolves immediately when no worker is running.
    pub async fn emit_update(&self, message: &HmrMessage) -> Result<()> {
        if message.is_reload() {
            return self.restart().await;
        }
        if !matches!(message, HmrMessage::Update { .. }) {
            return Ok(());
        }

        let mut slot = self.worker.lock().await;
        let Some(worker) = slot.as_mut() else {
            return Ok(());
        };
        worker.process.post(message).await?;

        let reply = async {
            match self.options.ack_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, worker.replies.recv()).await {
                    Ok(reply) => reply.map_or(Ack::Gone, Ack::Reply),
                    Err(_) => Ack::TimedOut,
                },
                None => worker.replies.recv().await.map_or(Ack::Gone, Ack::Reply),
            }
        };
        let ack = tokio::select! {
            biased;
            _ = self.wait_for_stop() => Ack::Stopped,
            ack = reply => ack,
        };

        match ack {
            Ack::Reply(Value::String(reply)) if reply == RESTART_SENTINEL => {
                tracing::info!("Worker cannot apply the update in place, restarting");
                self.restart_locked(&mut slot).await
            }
            Ack::Reply(_) | Ack::Gone => Ok(()),
            Ack::Stopped => {
                tracing::debug!("Runner stopped while waiting for the worker");
                Ok(())
            }
            Ack::TimedOut => {
                tracing::warn!(
                    timeout_ms = self.options.ack_timeout.map(|t| t.as_millis() as u64),
                    "Worker did not acknowledge the update, restarting"
                );
                self.restart_locked(&mut slot).await
            }
        }
    }

    pub async fn restart(&self) -> Result<()> {
        let mut slot = self.worker.lock().await;
        self.restart_locked(&mut slot).await
    }

    /// Terminate the worker. Idempotent.
    ///
    /// Pending update acknowledgements and worker starts are abandoned, so
    /// this never waits on an unresponsive worker.
    pub async fn stop(&self) {
        self.stopped.send_replace(true);
        let mut slot = self.worker.lock().await;
        if let Some(mut worker) = slot.take() {
            worker.process.terminate().await;
        }
        self.set_state(WorkerState::Stopped);
    }

    async fn restart_locked(&self, slot: &mut Option<ActiveWorker>) -> Result<()> {
        self.set_state(WorkerState::Restarting);
        if let Some(mut worker) = slot.take() {
            worker.process.terminate().await;
        }
        self.start_worker(slot).await
    }

    async fn start_worker(&self, slot: &mut Option<ActiveWorker>) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.wait_for_stop() => {
                self.set_state(WorkerState::Stopped);
                return Ok(());
            }
            _ = self.wait_for_build() => {}
        }
        let result = self.launch_worker().await;
        match result {
            Ok(worker) => {
                *slot = Some(worker);
                self.set_state(WorkerState::Running);
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Absent);
                Err(e)
            }
        }
    }

    async fn launch_worker(&self) -> Result<ActiveWorker> {
        let entry = self.entry_bundle().ok_or(DevError::NoWorkerEntry)?;
        self.set_state(WorkerState::Starting);

        let spec = WorkerSpec {
            entry: entry.file_path.clone(),
            cwd: self.options.project_root.clone(),
        };
        let LaunchedWorker { process, events } = self.launcher.launch(&spec).await?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let origin = entry
            .file_path
            .strip_prefix(&self.options.project_root)
            .unwrap_or(&entry.file_path)
            .display()
            .to_string();
        tracing::debug!(%origin, generation, "Starting worker");

        let (ready_tx, ready_rx) = oneshot::channel();
        let (reply_tx, replies) = mpsc::unbounded_channel();
        tokio::spawn(pump_events(PumpContext {
            runner: self.this.clone(),
            generation,
            origin,
            policy: self.options.policy,
            ready: Some(ready_tx),
            replies: reply_tx,
        }, events));

        let mut worker = ActiveWorker {
            generation,
            process,
            replies,
        };
        let ready = tokio::select! {
            biased;
            _ = self.wait_for_stop() => Err("Runner stopped before the worker was ready"),
            ready = ready_rx => ready.map_err(|_| "Worker exited before it was ready"),
        };
        if let Err(reason) = ready {
            worker.process.terminate().await;
            return Err(DevError::Worker(reason.to_string()));
        }
        Ok(worker)
    }

    fn entry_bundle(&self) -> Option<Bundle> {
        let graph = self.graph.lock().clone()?;
        graph
            .get_entry_bundles()
            .into_iter()
            .find(Bundle::is_node_script)
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    async fn wait_for_stop(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    async fn wait_for_build(&self) {
        let mut pending = self.build_pending.subscribe();
        let _ = pending.wait_for(|pending| !*pending).await;
    }

    async fn worker_exited(&self, generation: u64) {
        let mut slot = self.worker.lock().await;
        if slot.as_ref().is_some_and(|w| w.generation == generation) {
            *slot = None;
            self.set_state(WorkerState::Absent);
        }
    }
}

struct PumpContext {
    runner: Weak<NodeRunner>,
    generation: u64,
    origin: String,
    policy: WorkerPolicy,
    ready: Option<oneshot::Sender<()>>,
    replies: UnboundedSender<Value>,
}

impl PumpContext {
    fn signal_ready(&mut self) -> bool {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(());
                true
            }
            None => false,
        }
    }
}

/// Route worker output to the log, readiness and reply channels.
async fn pump_events(mut cx: PumpContext, mut events: UnboundedReceiver<WorkerEvent>) {
    let origin = cx.origin.clone();
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Online => {
                if cx.policy == WorkerPolicy::RestartOnChange {
                    cx.signal_ready();
                }
            }
            WorkerEvent::Message(value) => {
                // A live-patching worker reports readiness with its first message
                if cx.policy == WorkerPolicy::LivePatch && cx.signal_ready() {
                    continue;
                }
                let _ = cx.replies.send(value);
            }
            WorkerEvent::Stdout(line) => tracing::info!(origin = %origin, "{line}"),
            WorkerEvent::Stderr(line) => tracing::error!(origin = %origin, "{line}"),
            WorkerEvent::Error(error) => tracing::error!(origin = %origin, %error, "Worker error"),
            WorkerEvent::Exit(code) => {
                tracing::debug!(origin = %origin, ?code, "Worker exited");
                break;
            }
        }
    }

    let PumpContext {
        runner,
        generation,
        ready,
        replies,
        ..
    } = cx;
    drop(ready);
    drop(replies);
    if let Some(runner) = runner.upgrade() {
        runner.worker_exited(generation).await;
    }
}
