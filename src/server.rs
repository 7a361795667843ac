//! HTTP front end for the analysis pipeline.
//!
//! Each `POST /analyze` starts an independent run and streams its progress
//! events back as newline-delimited JSON. All runs share one orchestrator
//! and therefore one rate limiter. Dropping the response body (client
//! disconnect) closes the progress stream, which cancels the run.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Analyze a local path or git URL; `application/x-ndjson` stream |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Request
//!
//! ```json
//! { "target": "https://github.com/acme/shop", "token": null }
//! ```
//!
//! # Error Contract
//!
//! Requests rejected before a run starts get a JSON error body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "target must not be empty" } }
//! ```
//!
//! Failures after the stream has started are reported as the terminal
//! `error` event of the stream instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::config::Config;
use crate::llm::ChatClient;
use crate::orchestrator::{Orchestrator, Target};
use crate::progress;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router around a shared orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Bind `server.bind` and serve until the process exits.
pub async fn run_server(config: &Config, client: Arc<dyn ChatClient>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), client));
    let app = router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "analysis server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ POST /analyze ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    target: String,
    #[serde(default)]
    token: Option<String>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Response, AppError> {
    let target = request.target.trim();
    if target.is_empty() {
        return Err(bad_request("target must not be empty"));
    }
    let target = Target::parse(target, request.token.filter(|t| !t.is_empty()));
    debug!(
        remote = matches!(target, Target::Remote { .. }),
        "analysis requested"
    );

    let orchestrator = state.orchestrator.clone();
    let (sink, stream) = progress::channel(orchestrator.config().pipeline.bus_capacity);
    let ctx = orchestrator.context();
    tokio::spawn(async move {
        // The outcome is reported on the stream.
        let _ = orchestrator.run(&ctx, target, sink).await;
    });

    let lines = ReceiverStream::new(stream.into_inner())
        .map(|event| Ok::<_, Infallible>(event.to_line()));
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::ChatRequest;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl ChatClient for Offline {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            Err(LlmError::Network("offline".into()))
        }
    }

    async fn spawn_server() -> String {
        let mut config = Config::default();
        config.cache.enabled = false;
        let orchestrator = Arc::new(Orchestrator::new(config, Arc::new(Offline)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(orchestrator)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_reports_version() {
        let base = spawn_server().await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn empty_target_is_rejected() {
        let base = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/analyze", base))
            .json(&serde_json::json!({ "target": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn missing_directory_streams_a_single_input_error() {
        let base = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/analyze", base))
            .json(&serde_json::json!({ "target": "/definitely/not/here" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "application/x-ndjson"
        );
        let text = resp.text().await.unwrap();
        let events: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[0]["data"]["kind"], "input");
    }
}
