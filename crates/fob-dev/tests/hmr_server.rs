//! Integration tests for the HMR server.
//!
//! Tests verify the pending-request queue, the unresolved error slot and
//! the HTTP routes, driven without binding sockets.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use fob_dev::hmr::editor::{EditorLauncher, EditorTarget};
use fob_dev::hmr::routes::{
    CODE_FRAME_ENDPOINT, HmrRequest, LAUNCH_EDITOR_ENDPOINT, SOURCE_MAP_ENDPOINT,
};
use fob_dev::{DevServer, GraphSnapshot, HmrServer, HmrServerOptions, ServerConfig, ServerKind};
use fob_hmr::{
    Asset, Bundle, BuildDiagnostic, Environment, HmrMessage, MemoryBundleGraph, SharedBundleGraph,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const ORIGIN: &str = "http://localhost:1234";

#[derive(Default)]
struct RecordingEditor {
    opened: Mutex<Vec<EditorTarget>>,
}

impl EditorLauncher for RecordingEditor {
    fn open(&self, target: &EditorTarget) {
        self.opened.lock().push(target.clone());
    }
}

struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    editor: Arc<RecordingEditor>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(root.join("src/app.js"), "const a = 1;\nconst b = 2;\nconst c = 3;\n").unwrap();
        fs::write(root.join("dist/index.html"), "<html><body>home</body></html>").unwrap();
        fs::write(root.join("dist/index.js"), "console.log('bundle');\n").unwrap();
        Self {
            _temp: temp,
            root,
            editor: Arc::new(RecordingEditor::default()),
        }
    }

    fn hmr_server(&self, with_dist: bool) -> Arc<HmrServer> {
        Arc::new(HmrServer::new(
            HmrServerOptions {
                project_root: self.root.clone(),
                dist_dir: with_dist.then(|| self.root.join("dist")),
                public_url: "/".to_string(),
                origin: ORIGIN.to_string(),
            },
            self.editor.clone(),
        ))
    }

    fn dev_server(&self, kind: ServerKind, hmr: Arc<HmrServer>) -> Arc<DevServer> {
        Arc::new(DevServer::new(
            ServerConfig {
                kind,
                host: "127.0.0.1".to_string(),
                port: 0,
                project_root: self.root.clone(),
                dist_dir: self.root.join("dist"),
                public_url: "/".to_string(),
            },
            Some(hmr),
        ))
    }

    fn graph(&self, code: &str) -> SharedBundleGraph {
        let env = Environment::browser("browser");
        let mut graph = MemoryBundleGraph::new();
        graph.add_asset(Asset::new("a", "js", self.root.join("src/a.js"), env.clone()), code);
        graph.add_bundle(
            Bundle::new("b1", "js", self.root.join("dist/index.js"), env),
            &["a"],
            true,
        );
        Arc::new(graph)
    }
}

fn code_frame_request(file_name: &str, line: u32, column: u32) -> HmrRequest {
    let body = json!({
        "contextLines": 1,
        "frames": [{ "fileName": file_name, "lineNumber": line, "columnNumber": column }]
    });
    HmrRequest::post(CODE_FRAME_ENDPOINT, body.to_string())
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn encoded(path: &Path) -> String {
    urlencoding::encode(&path.display().to_string()).into_owned()
}

#[tokio::test]
async fn test_code_frame_request_waits_for_build_and_uses_new_graph() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.build_success(fixture.graph("const stale = 1;"));
    hmr.build_start();

    let request = code_frame_request(&format!("{ORIGIN}/__parcel_hmr/a"), 1, 7);
    let server = Arc::clone(&hmr);
    let pending = tokio::spawn(async move { server.handle(request).await });

    while hmr.queued_requests() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(!pending.is_finished());

    hmr.build_success(fixture.graph("const fresh = 2;"));
    let response = pending.await.unwrap().expect("code frame route");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hmr.queued_requests(), 0);

    let frames = body_json(response).await;
    let compiled = frames[0]["compiledLines"].as_str().unwrap();
    assert!(compiled.contains("fresh"));
    assert!(!compiled.contains("stale"));
}

#[tokio::test]
async fn test_queued_requests_are_answered_in_arrival_order() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.build_start();

    let answered: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let send = |label: &'static str, request: HmrRequest| {
        let server = Arc::clone(&hmr);
        let answered = Arc::clone(&answered);
        tokio::spawn(async move {
            let response = server.handle(request).await;
            answered.lock().push(label);
            response
        })
    };

    let first = send(
        "code-frame",
        code_frame_request(&format!("{ORIGIN}/__parcel_hmr/a"), 1, 1),
    );
    while hmr.queued_requests() < 1 {
        tokio::task::yield_now().await;
    }
    let filename = encoded(&fixture.root.join("src/app.js"));
    let second = send(
        "source-map",
        HmrRequest::get(&format!("{SOURCE_MAP_ENDPOINT}?filename={filename}")),
    );
    while hmr.queued_requests() < 2 {
        tokio::task::yield_now().await;
    }
    assert!(answered.lock().is_empty());

    hmr.build_success(fixture.graph("let x;"));
    assert!(!hmr.is_pending());

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(*answered.lock(), vec!["code-frame", "source-map"]);
}

#[tokio::test]
async fn test_missing_dist_dir_fails_without_queueing() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(false);
    hmr.build_start();

    let response = hmr
        .handle(code_frame_request("/anywhere.js", 1, 1))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hmr.queued_requests(), 0);
}

#[tokio::test]
async fn test_unresolved_error_keeps_only_latest_failure() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);

    hmr.emit_error(&[BuildDiagnostic::new("first failure")]).unwrap();
    hmr.emit_error(&[BuildDiagnostic::new("second failure")]).unwrap();

    let stored = hmr.unresolved_error().unwrap();
    assert!(stored.contains("second failure"));
    assert!(!stored.contains("first failure"));

    let (_id, mut rx) = hmr.connect_client();
    let received = rx.try_recv().unwrap();
    assert!(received.contains("second failure"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_update_computation_clears_unresolved_error() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.emit_error(&[BuildDiagnostic::new("broken")]).unwrap();

    let snapshot = GraphSnapshot::new(fixture.graph("ok"), Vec::new());
    assert_eq!(hmr.get_update(&snapshot).await.unwrap(), None);
    assert!(hmr.unresolved_error().is_none());

    let (_id, mut rx) = hmr.connect_client();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_updates_reach_every_connected_client() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    let (_a, mut rx_a) = hmr.connect_client();
    let (b, mut rx_b) = hmr.connect_client();
    assert_eq!(hmr.client_count(), 2);

    hmr.emit_update(&HmrMessage::Reload).unwrap();
    assert_eq!(rx_a.recv().await.as_deref(), Some(r#"{"type":"reload"}"#));
    assert_eq!(rx_b.recv().await.as_deref(), Some(r#"{"type":"reload"}"#));

    hmr.disconnect_client(b);
    assert_eq!(hmr.client_count(), 1);
}

#[tokio::test]
async fn test_hot_asset_route_serves_wrapped_module() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.build_success(fixture.graph("module.exports = 42;"));

    let response = hmr.handle(HmrRequest::get("/__parcel_hmr/a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/javascript"
    );
    let body = body_text(response).await;
    assert!(body.starts_with("parcelHotUpdate['a'] = function (require, module, exports) {"));
    assert!(body.contains("module.exports = 42;"));

    let missing = hmr.handle(HmrRequest::get("/__parcel_hmr/nope")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_source_map_route() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.build_success(fixture.graph(""));

    let filename = encoded(&fixture.root.join("src/app.js"));
    let response = hmr
        .handle(HmrRequest::get(&format!("{SOURCE_MAP_ENDPOINT}?filename={filename}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let map = body_json(response).await;
    assert_eq!(map["sources"], json!(["src/app.js"]));

    let response = hmr
        .handle(HmrRequest::get(&format!("{SOURCE_MAP_ENDPOINT}?filename=%2Fetc%2Fpasswd")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = hmr.handle(HmrRequest::get(SOURCE_MAP_ENDPOINT)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_launch_editor_route() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);

    let response = hmr
        .handle(HmrRequest::get(&format!(
            "{LAUNCH_EDITOR_ENDPOINT}?file=%2F__parcel_source_root%2Fsrc%2Fapp.js%3A3%3A1"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let opened = fixture.editor.opened.lock();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].file, fixture.root.join("src/app.js"));
    assert_eq!(opened[0].line, Some(3));
    assert_eq!(opened[0].column, Some(1));
}

#[tokio::test]
async fn test_unknown_paths_are_not_handled() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    assert!(hmr.handle(HmrRequest::get("/index.html")).await.is_none());
}

#[tokio::test]
async fn test_dev_server_serves_dist_and_sources() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    let server = fixture.dev_server(ServerKind::Dev, hmr);
    let router = server.router();

    let response = router.clone().oneshot(get("/index.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "console.log('bundle');\n");

    let response = router.clone().oneshot(get("/some/client/route")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("home"));

    let response = router
        .clone()
        .oneshot(get("/__parcel_source_root/src/app.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.starts_with("const a = 1;"));

    let response = router.oneshot(get("/missing.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dev_server_routes_hmr_requests() {
    let fixture = Fixture::new();
    let hmr = fixture.hmr_server(true);
    hmr.build_success(fixture.graph("export {};"));
    let server = fixture.dev_server(ServerKind::Dev, hmr);

    let response = server
        .router()
        .oneshot(get("/__parcel_hmr/a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("export {};"));
}

#[tokio::test]
async fn test_dev_server_shows_error_page_after_failed_build() {
    let fixture = Fixture::new();
    let server = fixture.dev_server(ServerKind::Dev, fixture.hmr_server(true));
    server.build_error(&[BuildDiagnostic::new("Unexpected <token>")]);
    assert!(server.status().is_failed());

    let response = server.router().oneshot(get("/index.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.contains("Build Error"));
    assert!(body.contains("Unexpected &lt;token&gt;"));
}

#[tokio::test]
async fn test_dev_server_holds_static_requests_while_building() {
    let fixture = Fixture::new();
    let server = fixture.dev_server(ServerKind::Dev, fixture.hmr_server(true));
    server.build_start();

    let router = server.router();
    let pending = tokio::spawn(async move { router.oneshot(get("/index.js")).await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!pending.is_finished());

    server.build_success();
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_hmr_only_server_does_not_serve_files() {
    let fixture = Fixture::new();
    let server = fixture.dev_server(ServerKind::HmrOnly, fixture.hmr_server(false));
    let router = server.router();

    let response = router.clone().oneshot(get("/index.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(get("/__parcel_source_root/src/app.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dev_server_start_and_stop() {
    let fixture = Fixture::new();
    let server = fixture.dev_server(ServerKind::Dev, fixture.hmr_server(true));

    let addr = server.start().await.unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));
    assert!(server.start().await.is_err());

    server.stop().await;
    assert_eq!(server.local_addr(), None);
    server.stop().await;
}
