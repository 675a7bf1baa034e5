//! Translates build pipeline events into server, HMR and worker actions.
//!
//! Servers and runners are created lazily by the first build that needs
//! them and live in a [`DevServerRegistry`] until watch mode ends.

use crate::config::DevOptions;
use crate::error::Result;
use crate::events::{BuildEvent, BuildProgress, GraphSnapshot};
use crate::hmr::editor::{EditorLauncher, SystemEditor};
use crate::hmr::{HmrServer, HmrServerOptions};
use crate::registry::DevServerRegistry;
use crate::runner::{NodeProcessLauncher, NodeRunner, NodeRunnerOptions, WorkerLauncher};
use crate::server::{DevServer, ServerConfig, ServerKind};
use fob_hmr::{Bundle, BuildDiagnostic, HmrMessage, SharedBundleGraph};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct BuildEventCoordinator {
    options: DevOptions,
    registry: Arc<DevServerRegistry>,
    launcher: Arc<dyn WorkerLauncher>,
    editor: Arc<dyn EditorLauncher>,
    /// Update dispatched while packaging was still running
    early_update: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BuildEventCoordinator {
    pub fn new(options: DevOptions, registry: Arc<DevServerRegistry>) -> Self {
        let launcher = Arc::new(NodeProcessLauncher::new(options.node.binary.clone()));
        let editor = Arc::new(SystemEditor::new(options.editor.clone()));
        Self {
            options,
            registry,
            launcher,
            editor,
            early_update: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_worker_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn EditorLauncher>) -> Self {
        self.editor = editor;
        self
    }

    pub fn options(&self) -> &DevOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<DevServerRegistry> {
        &self.registry
    }

    /// Handle one pipeline event.
    pub async fn report(&self, event: &BuildEvent) -> Result<()> {
        tracing::debug!(event = event.name(), "Build event");
        match event {
            BuildEvent::BuildStart => {
                self.build_start();
                Ok(())
            }
            BuildEvent::BuildProgress(BuildProgress::Bundled(snapshot)) => {
                self.bundled(snapshot).await
            }
            BuildEvent::BuildProgress(progress) => {
                tracing::trace!(phase = progress.phase(), "Build progress");
                Ok(())
            }
            BuildEvent::BuildSuccess(snapshot) => self.build_success(snapshot).await,
            BuildEvent::BuildFailure { diagnostics } => self.build_failure(diagnostics).await,
            BuildEvent::WatchEnd => {
                self.watch_end().await;
                Ok(())
            }
        }
    }

    fn build_start(&self) {
        if let Some(server) = self.dev_server() {
            server.build_start();
        }
        if let Some(server) = self.hmr_only_server() {
            server.build_start();
        }
        if let Some(hmr) = self.hmr_server() {
            hmr.build_start();
        }
        if let Some(runner) = self.registry.runner(&self.options.instance_id) {
            runner.build_start();
        }
    }

    /// Push the update as soon as the bundle graph is final.
    ///
    /// Only done while fully serving, so browsers never fetch bundles that
    /// are not written yet. The worker gets the update before browsers do.
    async fn bundled(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let (Some(_), Some(hmr)) = (self.dev_server(), self.hmr_server()) else {
            return Ok(());
        };
        let Some(update) = hmr.get_update(snapshot).await? else {
            return Ok(());
        };

        let runner = self.registry.runner(&self.options.instance_id);
        let handle = tokio::spawn(async move {
            if let Some(runner) = runner {
                if let Err(e) = runner.emit_update(&update).await {
                    tracing::error!(error = %e, "Failed to apply update to worker");
                }
            }
            if let Err(e) = hmr.emit_update(&update) {
                tracing::error!(error = %e, "Failed to broadcast update");
            }
        });
        *self.early_update.lock().await = Some(handle);
        Ok(())
    }

    async fn build_success(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let graph = &snapshot.bundle_graph;
        self.ensure_servers(Some(graph)).await?;

        if let Some(server) = self.dev_server() {
            server.build_success();
        }
        if let Some(server) = self.hmr_only_server() {
            server.build_success();
        }
        let hmr = self.hmr_server();
        if let Some(hmr) = &hmr {
            hmr.build_success(Arc::clone(graph));
        }

        let runner = self.ensure_runner(graph);
        let early_update = self.early_update.lock().await.take();
        if let Some(handle) = early_update {
            // The early update already reached worker and clients
            if let Some(runner) = &runner {
                if let Err(e) = runner.build_success(Arc::clone(graph)).await {
                    tracing::error!(error = %e, "Worker failed to pick up the build");
                }
            }
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Early update dispatch failed");
            }
            return Ok(());
        }

        let update = match &hmr {
            Some(hmr) => hmr.get_update(snapshot).await?,
            None => None,
        };
        if let Some(runner) = &runner {
            if let Err(e) = self.update_runner(runner, graph, update.as_ref()).await {
                tracing::error!(error = %e, "Worker failed to pick up the build");
            }
        }
        if let (Some(hmr), Some(update)) = (&hmr, &update) {
            hmr.emit_update(update)?;
        }
        Ok(())
    }

    /// A running worker is patched; a missing one is started on the new build.
    async fn update_runner(
        &self,
        runner: &NodeRunner,
        graph: &SharedBundleGraph,
        update: Option<&HmrMessage>,
    ) -> Result<()> {
        let had_worker = runner.state() == crate::runner::WorkerState::Running;
        runner.build_success(Arc::clone(graph)).await?;
        match update {
            Some(update) if had_worker => runner.emit_update(update).await,
            _ => Ok(()),
        }
    }

    async fn build_failure(&self, diagnostics: &[BuildDiagnostic]) -> Result<()> {
        self.ensure_servers(None).await?;

        if let Some(server) = self.dev_server() {
            server.build_error(diagnostics);
        }
        if let Some(server) = self.hmr_only_server() {
            server.build_error(diagnostics);
        }
        if let Some(hmr) = self.hmr_server() {
            hmr.emit_error(diagnostics)?;
        }
        Ok(())
    }

    async fn watch_end(&self) {
        if let Some(handle) = self.early_update.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(serve) = &self.options.serve {
            match self.registry.remove_server(serve.port) {
                Some(server) => server.stop().await,
                None => tracing::warn!(port = serve.port, "No dev server to stop"),
            }
        }

        if let Some(port) = self.options.hmr_port() {
            if !self.options.serves_hmr_on_dev_port() {
                match self.registry.remove_server(port) {
                    Some(server) => server.stop().await,
                    None => tracing::warn!(port, "No HMR server to stop"),
                }
            }
            if let Some(hmr) = self.registry.remove_hmr_server(port) {
                hmr.close_clients();
            }
        }

        if let Some(runner) = self.registry.remove_runner(&self.options.instance_id) {
            runner.stop().await;
        }
    }

    fn dev_server(&self) -> Option<Arc<DevServer>> {
        let serve = self.options.serve.as_ref()?;
        self.registry
            .server(serve.port)
            .filter(|s| s.config().kind == ServerKind::Dev)
    }

    fn hmr_only_server(&self) -> Option<Arc<DevServer>> {
        let port = self.options.hmr_port()?;
        self.registry
            .server(port)
            .filter(|s| s.config().kind == ServerKind::HmrOnly)
    }

    fn hmr_server(&self) -> Option<Arc<HmrServer>> {
        self.registry.hmr_server(self.options.hmr_port()?)
    }

    /// Create and start the servers this build needs, once.
    ///
    /// Full serving starts with the first build that has a browser or HTML
    /// entry. Without full serving a configured HMR port still gets an
    /// HMR-only server. Without a graph (failed build) entries are unknown
    /// and serving is assumed.
    async fn ensure_servers(&self, graph: Option<&SharedBundleGraph>) -> Result<()> {
        let has_browser_entry = graph.is_none_or(|graph| {
            graph
                .get_entry_bundles()
                .iter()
                .any(Bundle::is_browser_entry)
        });
        let full_serve = self.options.serve.is_some() && has_browser_entry;
        let hmr_port = self.options.hmr_port();

        let hmr = hmr_port.map(|port| {
            self.registry
                .get_or_create_hmr_server(port, || Arc::new(self.create_hmr_server()))
                .0
        });

        if let (true, Some(serve)) = (full_serve, &self.options.serve) {
            let shared_hmr = hmr.clone().filter(|_| self.options.serves_hmr_on_dev_port());
            let (server, created) = self.registry.get_or_create_server(serve.port, || {
                Arc::new(DevServer::new(
                    self.server_config(ServerKind::Dev, serve.port),
                    shared_hmr,
                ))
            });
            if created {
                self.start_server(&server, serve.port).await?;
            }
        }

        if let (Some(port), Some(hmr)) = (hmr_port, hmr) {
            let needs_own_server = !full_serve || !self.options.serves_hmr_on_dev_port();
            if needs_own_server {
                let (server, created) = self.registry.get_or_create_server(port, || {
                    Arc::new(DevServer::new(
                        self.server_config(ServerKind::HmrOnly, port),
                        Some(hmr),
                    ))
                });
                if created {
                    self.start_server(&server, port).await?;
                }
            }
        }
        Ok(())
    }

    /// Start a newly registered server. A server that fails to bind is
    /// unregistered so the next build tries again.
    async fn start_server(&self, server: &Arc<DevServer>, port: u16) -> Result<()> {
        if let Err(e) = server.start().await {
            self.registry.remove_server(port);
            return Err(e);
        }
        Ok(())
    }

    /// Runner for builds with a Node entry bundle.
    fn ensure_runner(&self, graph: &SharedBundleGraph) -> Option<Arc<NodeRunner>> {
        let instance_id = &self.options.instance_id;
        if let Some(runner) = self.registry.runner(instance_id) {
            return Some(runner);
        }
        let has_node_entry = graph
            .get_entry_bundles()
            .iter()
            .any(Bundle::is_node_script);
        if !has_node_entry {
            return None;
        }

        let options = NodeRunnerOptions {
            project_root: self.options.project_root.clone(),
            policy: self.options.worker_policy(),
            ack_timeout: self.options.node.ack_timeout_ms.map(Duration::from_millis),
        };
        let launcher = Arc::clone(&self.launcher);
        let (runner, _) = self
            .registry
            .get_or_create_runner(instance_id, || NodeRunner::new(options, launcher));
        Some(runner)
    }

    fn create_hmr_server(&self) -> HmrServer {
        let dist_dir = self.options.serve.as_ref().map(|_| self.options.dist_dir());
        HmrServer::new(
            HmrServerOptions {
                project_root: self.options.project_root.clone(),
                dist_dir,
                public_url: self.options.public_url().to_string(),
                origin: self.options.hmr_origin(),
            },
            Arc::clone(&self.editor),
        )
    }

    fn server_config(&self, kind: ServerKind, port: u16) -> ServerConfig {
        let host = match kind {
            ServerKind::Dev => self.options.serve.as_ref().map(|s| s.host.clone()),
            ServerKind::HmrOnly => self.options.hmr.as_ref().map(|h| h.host.clone()),
        };
        ServerConfig {
            kind,
            host: host.unwrap_or_else(crate::config::default_host),
            port,
            project_root: self.options.project_root.clone(),
            dist_dir: self.options.dist_dir(),
            public_url: self.options.public_url().to_string(),
        }
    }
}
