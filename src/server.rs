use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    scanner::Scanner,
    types::{ScanConfig, ScanState},
};

#[derive(Clone)]
pub struct AppState {
    scanner: Arc<Scanner>,
}

impl AppState {
    pub fn new(scanner: Arc<Scanner>) -> Self {
        Self { scanner }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub state: ScanState,
    pub cursor_port: u16,
    pub progress_percent: f64,
    pub open: u64,
    pub closed: u64,
    pub blocked: u64,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    pub start_port: u16,
    pub end_port: u16,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

const DEFAULT_TIMEOUT_MS: u64 = 1000;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, scanner: Arc<Scanner>) -> Result<()> {
    let app = router(AppState::new(scanner));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "serving control API");
    axum::serve(listener, app).await?;
    Ok(())
}

fn current_status(app: &AppState) -> Status {
    let snap = app.scanner.snapshot();
    Status {
        state: snap.state,
        cursor_port: snap.cursor_port,
        progress_percent: snap.progress_percent,
        open: snap.summary.open,
        closed: snap.summary.closed,
        blocked: snap.summary.blocked,
    }
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(current_status(&app)))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let snap = app.scanner.snapshot();
    if snap.state == ScanState::Idle {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::OK, Json(snap.results)).into_response()
    }
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    app.scanner.stop();
    (StatusCode::ACCEPTED, Json(current_status(&app)))
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let config = ScanConfig::new(
        req.target,
        req.start_port,
        req.end_port,
        req.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
    );

    match app.scanner.start(config) {
        Ok(_handle) => (StatusCode::ACCEPTED, Json(current_status(&app))).into_response(),
        Err(e) => {
            warn!(error = %e, "rejected scan request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::PortProbe;
    use crate::scanner::ScanOptions;
    use crate::types::PortStatus;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::net::IpAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    struct AllOpen;

    #[async_trait]
    impl PortProbe for AllOpen {
        async fn probe(&self, _addr: IpAddr, _port: u16, _timeout: Duration) -> PortStatus {
            PortStatus::Open
        }
    }

    fn app() -> (Router, Arc<Scanner>) {
        let scanner = Arc::new(Scanner::new(
            AllOpen,
            ScanOptions {
                batch_size: 4,
                batch_pause: Duration::ZERO,
            },
        ));
        (router(AppState::new(scanner.clone())), scanner)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_is_idle_before_any_scan() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let status: Status = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status.state, ScanState::Idle);
    }

    #[tokio::test]
    async fn reversed_range_is_bad_request() {
        let (app, scanner) = app();
        let resp = app
            .oneshot(post_json(
                "/api/scan",
                r#"{"target":"127.0.0.1","start_port":90,"end_port":80}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(scanner.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn scan_runs_to_completion_and_results_are_served() {
        let (app, scanner) = app();
        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/scan",
                r#"{"target":"127.0.0.1","start_port":8000,"end_port":8009,"timeout_ms":50}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        for _ in 0..200 {
            if scanner.state().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scanner.state(), ScanState::Completed);

        let resp = app
            .oneshot(Request::get("/api/results").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let results: Vec<crate::types::PortResult> = serde_json::from_slice(&bytes).unwrap();
        let ports: Vec<u16> = results.iter().map(|r| r.port).collect();
        assert_eq!(ports, (8000..=8009).collect::<Vec<u16>>());
    }

    #[tokio::test]
    async fn stop_when_idle_is_accepted_noop() {
        let (app, scanner) = app();
        let resp = app.oneshot(post_json("/api/stop", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(scanner.state(), ScanState::Idle);
    }
}
