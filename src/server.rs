//! HTTP trigger for generator runs.
//!
//! Endpoints:
//! - GET  /health           - Health check
//! - POST /generate_configs - Write service configs and permissions.json
//! - POST /update_qgs       - Write the QGIS projects
//!
//! Runs are serialized: a request waits until the previous run finished.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::Result;
use crate::generator::ConfigGenerator;
use crate::run_log::{LogEntry, RunLog};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    generator: Arc<ConfigGenerator>,
    run_lock: Arc<Mutex<()>>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct RunResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    log: Vec<LogEntry>,
}

impl RunResponse {
    fn from_run(result: Result<RunLog>, message: &str) -> (StatusCode, Json<Self>) {
        match result {
            Ok(log) => (
                StatusCode::OK,
                Json(Self {
                    message: Some(message.to_string()),
                    error: None,
                    log: log.into_entries(),
                }),
            ),
            Err(e) => {
                error!(error = %e, "Generator run failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Self {
                        message: None,
                        error: Some(e.to_string()),
                        log: Vec::new(),
                    }),
                )
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn generate_configs(State(state): State<AppState>) -> (StatusCode, Json<RunResponse>) {
    let _guard = state.run_lock.lock().await;
    let result = state.generator.write_all().await;
    RunResponse::from_run(result, "Finished writing service configs")
}

async fn update_qgs(State(state): State<AppState>) -> (StatusCode, Json<RunResponse>) {
    let _guard = state.run_lock.lock().await;
    let result = state.generator.write_qgs().await;
    RunResponse::from_run(result, "Finished writing QGIS project files")
}

// ============================================================================
// Router
// ============================================================================

pub fn router(generator: Arc<ConfigGenerator>) -> Router {
    let state = AppState {
        generator,
        run_lock: Arc::new(Mutex::new(())),
    };

    Router::new()
        .route("/health", get(health))
        .route("/generate_configs", post(generate_configs))
        .route("/update_qgs", post(update_qgs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::schema::SchemaValidator;
    use crate::services::fixtures;
    use crate::settings::RunSettings;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app(dir: &std::path::Path) -> Router {
        let mut settings =
            RunSettings::from_value(json!({"services": [{"name": "print"}]})).unwrap();
        settings.config.config_path = dir.to_path_buf();
        settings.qgs_writer.project_output_dir = dir.join("qgs");
        let generator = ConfigGenerator::new(
            settings,
            Arc::new(MemoryStore::new(fixtures::catalog(), fixtures::grants())),
            Arc::new(fixtures::introspector()),
            SchemaValidator::disabled(),
        )
        .await
        .unwrap();
        router(Arc::new(generator))
    }

    async fn post_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn generate_configs_returns_message_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_json(app(dir.path()).await, "/generate_configs").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("Finished writing service configs"));
        assert!(body.get("error").is_none());
        let log = body["log"].as_array().unwrap();
        assert_eq!(log[0], json!({"msg": "Creating default tenant dir", "level": "info"}));
        assert!(dir.path().join("default/printConfig.json").is_file());
        assert!(dir.path().join("default/permissions.json").is_file());
    }

    #[tokio::test]
    async fn update_qgs_writes_projects() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_json(app(dir.path()).await, "/update_qgs").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("Finished writing QGIS project files"));
        assert!(dir.path().join("qgs/somap_print.qgs").is_file());
    }

    #[tokio::test]
    async fn get_is_not_allowed_on_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .await
            .oneshot(
                Request::builder()
                    .uri("/generate_configs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
