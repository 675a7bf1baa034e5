//! HTTP endpoints consumed by HMR runtime clients.
//!
//! Routes are tried in order; the first whose predicate accepts the method
//! and path owns the request. Deferred routes depend on a finished build and
//! are queued while one is in flight.

use super::{Deferral, HmrServer};
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use fob_hmr::{CodeFrameRequest, HMR_ENDPOINT, hot_asset_contents, resolve_frames};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::Path;

pub const CODE_FRAME_ENDPOINT: &str = "/__parcel_code_frame";
pub const SOURCE_MAP_ENDPOINT: &str = "/__parcel_source_map";
pub const LAUNCH_EDITOR_ENDPOINT: &str = "/__parcel_launch_editor";

/// Request as seen by the HMR routes, detached from the HTTP server.
#[derive(Debug, Clone)]
pub struct HmrRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub body: Bytes,
}

impl HmrRequest {
    pub fn get(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };
        Self {
            method: Method::GET,
            path,
            query,
            body: Bytes::new(),
        }
    }

    pub fn post(path: &str, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path: path.to_string(),
            query: None,
            body: body.into(),
        }
    }

    /// First value of a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

type Handler = for<'a> fn(&'a HmrServer, HmrRequest) -> BoxFuture<'a, Response>;

pub(crate) struct Route {
    pub name: &'static str,
    matches: fn(&Method, &str) -> bool,
    /// Needs a finished build and a dist directory
    pub deferred: bool,
    handler: Handler,
}

static ROUTES: &[Route] = &[
    Route {
        name: "hot-asset",
        matches: |method, path| method == Method::GET && hot_asset_id(path).is_some(),
        deferred: false,
        handler: |server, request| hot_asset(server, request).boxed(),
    },
    Route {
        name: "code-frame",
        matches: |method, path| method == Method::POST && path == CODE_FRAME_ENDPOINT,
        deferred: true,
        handler: |server, request| code_frame(server, request).boxed(),
    },
    Route {
        name: "source-map",
        matches: |_, path| path == SOURCE_MAP_ENDPOINT,
        deferred: true,
        handler: |server, request| source_map(server, request).boxed(),
    },
    Route {
        name: "launch-editor",
        matches: |_, path| path == LAUNCH_EDITOR_ENDPOINT,
        deferred: false,
        handler: |server, request| launch_editor(server, request).boxed(),
    },
];

/// Route that owns a request, if any.
pub(crate) fn route_for(method: &Method, path: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|route| (route.matches)(method, path))
}

/// Whether any HMR route owns this request.
pub fn is_hmr_request(method: &Method, path: &str) -> bool {
    route_for(method, path).is_some()
}

fn hot_asset_id(path: &str) -> Option<&str> {
    path.strip_prefix(HMR_ENDPOINT)?
        .strip_prefix('/')
        .filter(|id| !id.is_empty())
}

impl HmrServer {
    /// Dispatch a request.
    ///
    /// Returns `None` when no route owns it; the caller answers 404.
    pub async fn handle(&self, request: HmrRequest) -> Option<Response> {
        let route = route_for(&request.method, &request.path)?;
        tracing::debug!(route = route.name, path = %request.path, "Handling HMR request");

        if route.deferred {
            if self.options().dist_dir.is_none() {
                return Some(internal_error("No dist directory is configured"));
            }
            return Some(match self.defer_if_pending(request) {
                Deferral::Queued(reply) => reply.await.unwrap_or_else(|_| not_found()),
                Deferral::Ready(request) => (route.handler)(self, request).await,
            });
        }

        Some((route.handler)(self, request).await)
    }
}

async fn hot_asset(server: &HmrServer, request: HmrRequest) -> Response {
    let Some(id) = hot_asset_id(&request.path) else {
        return not_found();
    };
    let id = urlencoding::decode(id).map(|s| s.into_owned()).unwrap_or_else(|_| id.to_string());
    let Some(build) = server.current_build() else {
        return not_found();
    };
    let graph = build.locator.graph();
    let Some(asset) = graph.get_asset_by_id(&id) else {
        return not_found();
    };

    let result = if asset.is_js() {
        hot_asset_contents(
            graph.as_ref(),
            &asset,
            &server.options().origin,
            &server.options().project_root,
        )
        .await
    } else {
        graph.get_code(&asset).await
    };

    match result {
        Ok(contents) => respond(
            StatusCode::OK,
            content_type_for(&asset.asset_type),
            contents,
        ),
        Err(e) => internal_error(&e.to_string()),
    }
}

async fn code_frame(server: &HmrServer, request: HmrRequest) -> Response {
    let body: CodeFrameRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(e) => return bad_request(&format!("Invalid code frame request: {e}")),
    };
    let Some(build) = server.current_build() else {
        return not_found();
    };

    let frames = resolve_frames(&build.locator, body).await;
    match serde_json::to_string(&frames) {
        Ok(json) => respond(StatusCode::OK, "application/json", json),
        Err(e) => internal_error(&e.to_string()),
    }
}

async fn source_map(server: &HmrServer, request: HmrRequest) -> Response {
    let Some(filename) = request.query_param("filename") else {
        return bad_request("Missing 'filename' query parameter");
    };
    let Some(build) = server.current_build() else {
        return not_found();
    };

    match build.locator.raw_source_map(&filename).await {
        Ok(map) => respond(StatusCode::OK, "application/json", map),
        Err(e) => {
            tracing::debug!(%filename, error = %e, "Source map request failed");
            internal_error(&e.to_string())
        }
    }
}

async fn launch_editor(server: &HmrServer, request: HmrRequest) -> Response {
    if let Some(file) = request.query_param("file") {
        let target = super::editor::parse_editor_target(&file, &server.options().project_root);
        server.editor().open(&target);
    }
    respond(StatusCode::OK, "text/plain", "")
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

pub fn not_found() -> Response {
    respond(StatusCode::NOT_FOUND, "text/plain", "Not Found")
}

fn bad_request(message: &str) -> Response {
    respond(StatusCode::BAD_REQUEST, "text/plain", message.to_string())
}

fn internal_error(message: &str) -> Response {
    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", message.to_string())
}

/// Content type for an asset type or file extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "wasm" => "application/wasm",
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

/// Content type for a file path, by extension.
pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    content_type_for(extension)
}
