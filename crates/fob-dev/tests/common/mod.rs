//! In-memory worker launcher shared by the runner and coordinator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fob_dev::WorkerPolicy;
use fob_dev::error::Result;
use fob_dev::runner::{LaunchedWorker, WorkerEvent, WorkerLauncher, WorkerProcess, WorkerSpec};
use fob_hmr::HmrMessage;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Default)]
pub struct Shared {
    pub launches: Mutex<Vec<WorkerSpec>>,
    pub posted: Mutex<Vec<HmrMessage>>,
    /// Replies to upcoming updates; "ok" when empty
    pub replies: Mutex<VecDeque<Value>>,
    /// Never answer updates
    pub silent: AtomicBool,
    pub terminated: AtomicUsize,
    pub current: Mutex<Option<UnboundedSender<WorkerEvent>>>,
}

pub struct FakeLauncher {
    pub shared: Arc<Shared>,
    /// Live-patching workers announce themselves with a message
    announce: bool,
}

impl FakeLauncher {
    pub fn new(policy: WorkerPolicy) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            announce: policy == WorkerPolicy::LivePatch,
        }
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<LaunchedWorker> {
        self.shared.launches.lock().push(spec.clone());
        let (events, rx) = mpsc::unbounded_channel();
        let _ = events.send(WorkerEvent::Online);
        let _ = events.send(WorkerEvent::Stdout("worker started".to_string()));
        if self.announce {
            let _ = events.send(WorkerEvent::Message(json!({ "type": "ready" })));
        }
        *self.shared.current.lock() = Some(events.clone());
        Ok(LaunchedWorker {
            process: Box::new(FakeProcess {
                events,
                shared: Arc::clone(&self.shared),
            }),
            events: rx,
        })
    }
}

struct FakeProcess {
    events: UnboundedSender<WorkerEvent>,
    shared: Arc<Shared>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    async fn post(&mut self, message: &HmrMessage) -> Result<()> {
        self.shared.posted.lock().push(message.clone());
        if !self.shared.silent.load(Ordering::SeqCst) {
            let reply = self
                .shared
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| json!("ok"));
            let _ = self.events.send(WorkerEvent::Message(reply));
        }
        Ok(())
    }

    async fn terminate(&mut self) {
        self.shared.terminated.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(WorkerEvent::Exit(None));
    }
}

impl Shared {
    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Send an event as the most recently launched worker.
    pub fn send(&self, event: WorkerEvent) {
        if let Some(events) = self.current.lock().as_ref() {
            let _ = events.send(event);
        }
    }
}
