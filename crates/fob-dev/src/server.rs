//! Development server.
//!
//! Serves the build output and the project sources, and hosts the HMR
//! routes and WebSocket on the same port. An HMR-only server exposes just
//! the HMR routes and the WebSocket, for setups where HMR has its own port.

use crate::error::{DevError, Result};
use crate::hmr::socket::serve_client;
use crate::hmr::{HmrServer, is_hmr_request, not_found};
use crate::hmr::routes::HmrRequest;
use axum::body::{Body, to_bytes};
use axum::extract::{FromRequestParts, Request, State};
use axum::extract::ws::WebSocketUpgrade;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Router;
use fob_hmr::{BuildDiagnostic, RenderedDiagnostic, SOURCES_ENDPOINT, render_diagnostics};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

/// Request bodies the HMR routes accept, in bytes.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Build output, sources endpoint and HMR
    Dev,
    /// HMR routes and WebSocket only
    HmrOnly,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub kind: ServerKind,
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub project_root: PathBuf,
    pub dist_dir: PathBuf,
    pub public_url: String,
}

/// Build status tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    /// A build is running; static requests wait for it
    Pending,
    /// Last build completed successfully
    Ready,
    /// Last build failed; HTML-escaped diagnostics
    Failed { diagnostics: Vec<RenderedDiagnostic> },
}

impl BuildStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, BuildStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BuildStatus::Failed { .. })
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct DevServer {
    config: ServerConfig,
    hmr: Option<Arc<HmrServer>>,
    status: watch::Sender<BuildStatus>,
    running: Mutex<Option<Running>>,
}

impl DevServer {
    /// `hmr` is attached when HMR shares this server's port.
    pub fn new(config: ServerConfig, hmr: Option<Arc<HmrServer>>) -> Self {
        let (status, _) = watch::channel(BuildStatus::Ready);
        Self {
            config,
            hmr,
            status,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hmr(&self) -> Option<&Arc<HmrServer>> {
        self.hmr.as_ref()
    }

    pub fn status(&self) -> BuildStatus {
        self.status.borrow().clone()
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn build_start(&self) {
        self.status.send_replace(BuildStatus::Pending);
    }

    pub fn build_success(&self) {
        self.status.send_replace(BuildStatus::Ready);
    }

    pub fn build_error(&self, diagnostics: &[BuildDiagnostic]) {
        let rendered = render_diagnostics(diagnostics);
        self.status.send_replace(BuildStatus::Failed {
            diagnostics: rendered.html,
        });
    }

    /// Build the axum router with all routes.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();
        if self.config.kind == ServerKind::Dev {
            router = router.nest_service(SOURCES_ENDPOINT, ServeDir::new(&self.config.project_root));
        }
        router
            .fallback(handle_request)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(self))
    }

    /// Bind the configured address and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns error if the server is already running or cannot bind
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Err(DevError::Server(format!("Server is already listening on {addr}")));
        }

        let host = self.config.host.as_str();
        let port = self.config.port;
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| DevError::Server(format!("Failed to bind to {host}:{port}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
            }
        });

        *self.running.lock() = Some(Running {
            local_addr,
            shutdown,
            task,
        });

        match self.config.kind {
            ServerKind::Dev => tracing::info!("Server running at http://{host}:{}", local_addr.port()),
            ServerKind::HmrOnly => tracing::info!("HMR server listening on port {}", local_addr.port()),
        }
        Ok(local_addr)
    }

    /// Close all HMR clients and stop accepting requests. Idempotent.
    pub async fn stop(&self) {
        if let Some(hmr) = &self.hmr {
            hmr.close_clients();
        }
        let running = self.running.lock().take();
        if let Some(Running {
            local_addr,
            shutdown,
            task,
        }) = running
        {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Server task did not shut down cleanly");
            }
            tracing::debug!(%local_addr, "Server stopped");
        }
    }
}

async fn handle_request(State(server): State<Arc<DevServer>>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    if let Some(hmr) = &server.hmr {
        if is_websocket_upgrade(&parts.headers) {
            return match WebSocketUpgrade::from_request_parts(&mut parts, &server).await {
                Ok(ws) => {
                    let hmr = Arc::clone(hmr);
                    ws.on_upgrade(move |socket| serve_client(socket, hmr))
                }
                Err(rejection) => rejection.into_response(),
            };
        }
        if is_hmr_request(&parts.method, parts.uri.path()) {
            return handle_hmr(hmr, parts, body).await;
        }
    }

    if server.config.kind == ServerKind::HmrOnly {
        return not_found();
    }

    let mut status = server.status.subscribe();
    let status = match status.wait_for(|s| !s.is_pending()).await {
        Ok(status) => status.clone(),
        Err(_) => return not_found(),
    };
    if let BuildStatus::Failed { diagnostics } = status {
        return error_page(&diagnostics);
    }

    let Some(path) = strip_public_path(parts.uri.path(), &server.config.public_url) else {
        return not_found();
    };
    let uri = match rewrite_path(&parts.uri, &path) {
        Ok(uri) => uri,
        Err(_) => return not_found(),
    };
    parts.uri = uri;
    serve_dist(&server.config.dist_dir, &path, Request::from_parts(parts, body)).await
}

async fn handle_hmr(hmr: &HmrServer, parts: Parts, body: Body) -> Response {
    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    let request = HmrRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        body,
    };
    hmr.handle(request).await.unwrap_or_else(not_found)
}

async fn serve_dist(dist_dir: &Path, path: &str, request: Request) -> Response {
    let files = ServeDir::new(dist_dir);
    // Extensionless paths are client-side routes of the HTML entry
    let result: std::result::Result<Response, Infallible> = if Path::new(path).extension().is_none() {
        files
            .fallback(ServeFile::new(dist_dir.join("index.html")))
            .oneshot(request)
            .await
            .map(|r| r.map(Body::new))
    } else {
        files.oneshot(request).await.map(|r| r.map(Body::new))
    };

    let mut response = match result {
        Ok(response) => response,
        Err(never) => match never {},
    };
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Path below the public URL, or `None` if the request is outside it.
///
/// Absolute public URLs only contribute their path.
pub fn strip_public_path(path: &str, public_url: &str) -> Option<String> {
    let prefix = match url::Url::parse(public_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => public_url.to_string(),
    };
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}

fn rewrite_path(uri: &Uri, path: &str) -> std::result::Result<Uri, axum::http::Error> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    Uri::builder().path_and_query(path_and_query).build()
}

fn error_page(diagnostics: &[RenderedDiagnostic]) -> Response {
    let mut body = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Build Error</title>\n\
         <style>body{background:#1e1e1e;color:#e0e0e0;font-family:monospace;padding:2em}\
         h1{color:#ff5555}pre{white-space:pre-wrap}</style>\n</head>\n<body>\n<h1>Build Error</h1>\n",
    );
    for diagnostic in diagnostics {
        body.push_str(&format!("<h2>{}</h2>\n", diagnostic.message));
        if !diagnostic.codeframe.is_empty() {
            body.push_str(&format!("<pre>{}</pre>\n", diagnostic.codeframe));
        }
        if !diagnostic.stack.is_empty() {
            body.push_str(&format!("<pre>{}</pre>\n", diagnostic.stack));
        }
        for hint in &diagnostic.hints {
            body.push_str(&format!("<p>{hint}</p>\n"));
        }
    }
    body.push_str("</body>\n</html>\n");

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
