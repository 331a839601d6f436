//! HTTP surface: `/metrics`, `/healthz`, `POST /reload`, and an index page.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use tracing::error;

use harvest_exporter::{ExporterResult, Supervisor};

const INDEX: &str = r#"<html>
<head><title>cloudharvest</title></head>
<body>
<h1>cloudharvest</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub config_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, config_path: PathBuf) -> Self {
        Self {
            supervisor,
            config_path: Arc::new(config_path),
        }
    }

    /// Reload the jobs file the daemon was started with.
    pub async fn reload(&self) -> ExporterResult<()> {
        self.supervisor.reload(&self.config_path).await
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/reload", post(reload))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.supervisor.scraper().render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render registry");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn reload(State(state): State<AppState>) -> Response {
    match state.reload().await {
        Ok(()) => (StatusCode::OK, "reloaded\n").into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response(),
    }
}
