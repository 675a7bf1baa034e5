//! HMR server: live client set, pending-build request queue and the
//! unresolved build error.
//!
//! Between `build_start` and the next `build_success` the build is
//! *pending*. Code frame and source map requests that arrive while pending
//! are parked in a queue instead of being answered against a half-finished
//! build. `build_success` swaps the queue out and replays every parked
//! request, in arrival order, against the new build.
//!
//! A failed build leaves exactly one unresolved error behind. It is sent to
//! every client that connects while it is set and cleared by the next
//! computed update.

pub mod clients;
pub mod editor;
pub mod routes;
pub mod socket;

use crate::error::Result;
use crate::events::GraphSnapshot;
use axum::response::Response;
use clients::ClientRegistry;
use editor::EditorLauncher;
use fob_hmr::{
    BuildDiagnostic, HmrMessage, LocatorOptions, SharedBundleGraph, SourceMapLocator,
    UpdateComputer, render_diagnostics,
};
use parking_lot::Mutex;
use routes::HmrRequest;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

pub use routes::{is_hmr_request, not_found};

#[derive(Debug, Clone)]
pub struct HmrServerOptions {
    pub project_root: PathBuf,
    /// Unset for HMR-only setups that do not serve the build output
    pub dist_dir: Option<PathBuf>,
    pub public_url: String,
    /// Origin hot asset URLs are built from
    pub origin: String,
}

/// Graph of the latest build and the locator resolving paths against it.
pub(crate) struct BuildContext {
    pub locator: SourceMapLocator,
}

struct PendingRequest {
    request: HmrRequest,
    reply: oneshot::Sender<Response>,
}

#[derive(Default)]
struct ServerState {
    pending: bool,
    queue: Vec<PendingRequest>,
    unresolved_error: Option<Arc<str>>,
    build: Option<Arc<BuildContext>>,
}

pub(crate) enum Deferral {
    Queued(oneshot::Receiver<Response>),
    Ready(HmrRequest),
}

pub struct HmrServer {
    options: HmrServerOptions,
    clients: ClientRegistry,
    state: Mutex<ServerState>,
    editor: Arc<dyn EditorLauncher>,
    updates: UpdateComputer,
}

impl HmrServer {
    pub fn new(options: HmrServerOptions, editor: Arc<dyn EditorLauncher>) -> Self {
        let updates = UpdateComputer::new(options.origin.clone(), options.project_root.clone());
        Self {
            options,
            clients: ClientRegistry::new(),
            state: Mutex::new(ServerState::default()),
            editor,
            updates,
        }
    }

    pub fn options(&self) -> &HmrServerOptions {
        &self.options
    }

    pub(crate) fn editor(&self) -> &dyn EditorLauncher {
        self.editor.as_ref()
    }

    pub(crate) fn current_build(&self) -> Option<Arc<BuildContext>> {
        self.state.lock().build.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    pub fn queued_requests(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Current unresolved build error, as sent on the wire.
    pub fn unresolved_error(&self) -> Option<Arc<str>> {
        self.state.lock().unresolved_error.clone()
    }

    pub fn build_start(&self) {
        self.state.lock().pending = true;
    }

    /// Adopt a finished build and replay the requests parked while it ran.
    pub fn build_success(self: &Arc<Self>, bundle_graph: SharedBundleGraph) {
        let queue = {
            let mut state = self.state.lock();
            state.build = Some(self.build_context(bundle_graph));
            state.pending = false;
            std::mem::take(&mut state.queue)
        };
        if queue.is_empty() {
            return;
        }

        tracing::debug!(requests = queue.len(), "Replaying requests parked during build");
        let server = Arc::clone(self);
        tokio::spawn(async move {
            for PendingRequest { request, reply } in queue {
                let response = server.handle(request).await.unwrap_or_else(not_found);
                let _ = reply.send(response);
            }
        });
    }

    fn build_context(&self, bundle_graph: SharedBundleGraph) -> Arc<BuildContext> {
        let locator = SourceMapLocator::new(
            LocatorOptions {
                project_root: self.options.project_root.clone(),
                dist_dir: self
                    .options
                    .dist_dir
                    .clone()
                    .unwrap_or_else(|| self.options.project_root.clone()),
                public_url: self.options.public_url.clone(),
                origin: self.options.origin.clone(),
            },
            bundle_graph,
        );
        Arc::new(BuildContext { locator })
    }

    /// Park a request if the build is pending, otherwise hand it back.
    pub(crate) fn defer_if_pending(&self, request: HmrRequest) -> Deferral {
        let mut state = self.state.lock();
        if !state.pending {
            return Deferral::Ready(request);
        }
        tracing::debug!(path = %request.path, "Build pending, queueing request");
        let (reply, rx) = oneshot::channel();
        state.queue.push(PendingRequest { request, reply });
        Deferral::Queued(rx)
    }

    /// Compute the update for a build. Clears the unresolved error.
    pub async fn get_update(&self, snapshot: &GraphSnapshot) -> Result<Option<HmrMessage>> {
        {
            let mut state = self.state.lock();
            state.unresolved_error = None;
            state.build = Some(self.build_context(Arc::clone(&snapshot.bundle_graph)));
        }
        Ok(self
            .updates
            .get_update(snapshot.bundle_graph.as_ref(), &snapshot.changed_assets)
            .await?)
    }

    pub fn emit_update(&self, message: &HmrMessage) -> Result<()> {
        let json: Arc<str> = Arc::from(message.to_json()?);
        let delivered = self.clients.broadcast(&json);
        tracing::debug!(clients = delivered, reload = message.is_reload(), "Broadcast HMR update");
        Ok(())
    }

    /// Render diagnostics, store them as the unresolved error and broadcast.
    pub fn emit_error(&self, diagnostics: &[BuildDiagnostic]) -> Result<()> {
        let message = HmrMessage::Error {
            diagnostics: render_diagnostics(diagnostics),
        };
        let json: Arc<str> = Arc::from(message.to_json()?);

        let mut state = self.state.lock();
        state.unresolved_error = Some(Arc::clone(&json));
        self.clients.broadcast(&json);
        Ok(())
    }

    /// Register a client, sending it the unresolved error if there is one.
    pub fn connect_client(&self) -> (usize, UnboundedReceiver<Arc<str>>) {
        let state = self.state.lock();
        let (id, rx) = self.clients.register();
        if let Some(error) = &state.unresolved_error {
            self.clients.send_to(id, Arc::clone(error));
        }
        (id, rx)
    }

    pub fn disconnect_client(&self, id: usize) {
        self.clients.unregister(id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.count()
    }

    /// Force-close every open client connection.
    pub fn close_clients(&self) {
        self.clients.clear();
    }
}
