use crate::metrics::Metrics;
use crate::refresh::Refresher;
use crate::state::{Published, State as DisplayState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<DisplayState>>,
    pub refresher: Refresher,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<DisplayState>>,
    refresher: Refresher,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/report", get(report_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/history", get(history_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/export", post(export_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            refresher,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn latest(state: &HttpAppState) -> Option<Arc<Published>> {
    state.state.read().await.latest.clone()
}

fn not_ready() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "no snapshot collected yet" })),
    )
        .into_response()
}

async fn report_handler(State(state): State<HttpAppState>) -> Response {
    let Some(published) = latest(&state).await else {
        return not_ready();
    };
    let mut response = Response::new(Body::from(published.report.clone()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    match latest(&state).await {
        Some(published) => Json(&published.snapshot).into_response(),
        None => not_ready(),
    }
}

async fn summary_handler(State(state): State<HttpAppState>) -> Response {
    match latest(&state).await {
        Some(published) => Json(&published.summary).into_response(),
        None => not_ready(),
    }
}

async fn history_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(guard.history())
}

async fn refresh_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.refresher.spawn_refresh();
    (StatusCode::ACCEPTED, Json(json!({ "status": "refresh started" })))
}

async fn export_handler(
    State(state): State<HttpAppState>,
    body: Option<Json<ExportRequest>>,
) -> Response {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let target = match request.path {
        Some(name) => match export_target(state.refresher.export_dir(), &name) {
            Some(path) => Some(path),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "path must be a plain file name" })),
                )
                    .into_response();
            }
        },
        None => None,
    };
    match state.refresher.export(target).await {
        Ok(path) => (
            StatusCode::OK,
            Json(json!({ "path": path.display().to_string() })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

// remote callers may only name a file inside the export directory
fn export_target(dir: &Path, name: &Path) -> Option<PathBuf> {
    let mut components = name.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => Some(dir.join(file)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tests::{aggregator, FakeProvider};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(export_dir: &Path) -> (Router, Refresher, Arc<RwLock<DisplayState>>) {
        let metrics = Metrics::new().expect("metrics init");
        let state = Arc::new(RwLock::new(DisplayState::new(0, 30)));
        let refresher = Refresher::with_capture(
            Arc::new(|| aggregator().capture_from(&mut FakeProvider::default())),
            state.clone(),
            metrics.clone(),
            export_dir.to_path_buf(),
        );
        let router = build_router(metrics, state.clone(), refresher.clone());
        (router, refresher, state)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = app(dir.path());

        let response = app.oneshot(get_req("/healthz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn report_is_unavailable_before_first_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = app(dir.path());

        let response = app.clone().oneshot(get_req("/report")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = app.oneshot(get_req("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn report_serves_last_rendered_text() {
        let dir = tempfile::tempdir().unwrap();
        let (app, refresher, _) = app(dir.path());
        let published = refresher.refresh_now().await.unwrap();

        let response = app.oneshot(get_req("/report")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, published.report);
    }

    #[tokio::test]
    async fn snapshot_and_summary_are_json() {
        let dir = tempfile::tempdir().unwrap();
        let (app, refresher, _) = app(dir.path());
        refresher.refresh_now().await.unwrap();

        let response = app.clone().oneshot(get_req("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["identity"]["hostname"], "devbox");
        assert_eq!(value["disks"][0]["usage"]["status"], "measured");
        assert!(value["gpus"].as_array().unwrap().is_empty());

        let response = app.oneshot(get_req("/api/summary")).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["network"], "IP: 192.168.1.20");
    }

    #[tokio::test]
    async fn history_lists_published_samples() {
        let dir = tempfile::tempdir().unwrap();
        let (app, refresher, _) = app(dir.path());
        refresher.refresh_now().await.unwrap();
        refresher.refresh_now().await.unwrap();

        let response = app.oneshot(get_req("/api/history")).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["cpu"], json!([12.5, 12.5]));
        assert_eq!(value["memory"], json!([25.0, 25.0]));
    }

    #[tokio::test]
    async fn refresh_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = app(dir.path());

        let request = Request::builder()
            .method("POST")
            .uri("/api/refresh")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    fn export_req(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/export")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn export_writes_named_file_into_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, state) = app(dir.path());
        let target = dir.path().join("out.txt");

        let response = app.oneshot(export_req(json!({ "path": "out.txt" }))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["path"], target.display().to_string());

        let latest = state.read().await.latest.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), latest.report);
    }

    #[tokio::test]
    async fn export_without_body_uses_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = app(dir.path());

        let request = Request::builder()
            .method("POST")
            .uri("/api/export")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let path = PathBuf::from(value["path"].as_str().unwrap());
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn export_rejects_paths_outside_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside.txt");
        let export_dir = dir.path().join("exports");
        std::fs::create_dir(&export_dir).unwrap();
        let (app, _, state) = app(&export_dir);

        let absolute = outside.display().to_string();
        for path in [absolute.as_str(), "/etc/x", "../outside.txt", "sub/out.txt", ".."] {
            let response = app
                .clone()
                .oneshot(export_req(json!({ "path": path })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
            let value: serde_json::Value =
                serde_json::from_str(&body_text(response).await).unwrap();
            assert!(value["error"].is_string());
        }
        assert!(!outside.exists());
        assert!(state.read().await.latest.is_none());
    }

    #[tokio::test]
    async fn export_failure_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _, _) = app(&dir.path().join("missing"));

        let response = app.oneshot(export_req(json!({ "path": "out.txt" }))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(value["error"].as_str().unwrap().contains("out.txt"));
    }

    #[test]
    fn export_target_accepts_only_plain_names() {
        let dir = Path::new("/srv/reports");
        assert_eq!(
            export_target(dir, Path::new("report.txt")),
            Some(dir.join("report.txt"))
        );
        assert_eq!(export_target(dir, Path::new("/etc/passwd")), None);
        assert_eq!(export_target(dir, Path::new("../report.txt")), None);
        assert_eq!(export_target(dir, Path::new("a/b.txt")), None);
        assert_eq!(export_target(dir, Path::new("")), None);
    }

    #[tokio::test]
    async fn metrics_contains_refresh_counter() {
        let dir = tempfile::tempdir().unwrap();
        let (app, refresher, _) = app(dir.path());
        refresher.refresh_now().await.unwrap();

        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("fullinfo_refreshes_total 1"));
        assert!(text.contains("fullinfo_uptime_seconds"));
    }
}
