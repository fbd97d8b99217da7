//! HTTP front end for Sandrun
//!
//! Exposes the executor over a small JSON API:
//!
//! - `POST /execute` compiles and runs code, returning `{"runner_result": ...}`
//! - `POST /pack` installs extra packages for a language toolchain
//! - `GET /health` reports liveness

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use sandrun::{ExecutionRequest, ExecutionResult, Executor, LanguageManager, ResourceLimits};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

pub use crate::error::ApiError;

mod error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub languages: Arc<LanguageManager>,
}

impl AppState {
    pub fn new(executor: Executor, languages: LanguageManager) -> Self {
        Self {
            executor: Arc::new(executor),
            languages: Arc::new(languages),
        }
    }
}

/// Body of `POST /execute`
///
/// Limit fields are optional; 0 or absent means the configured default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteBody {
    pub language: String,
    pub version: String,
    pub code: String,
    pub filename: Option<String>,
    /// Compile wall clock timeout in seconds
    pub compile_timeout: u64,
    /// Run wall clock timeout in seconds
    pub run_timeout: u64,
    pub compile_cpu_timeout: u64,
    pub run_cpu_timeout: u64,
    pub compile_memory_limit_kb: u64,
    pub run_memory_limit_kb: u64,
}

impl ExecuteBody {
    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("language", &self.language),
            ("version", &self.version),
            ("code", &self.code),
        ] {
            if value.is_empty() {
                return Err(ApiError::invalid_request(format!("{field} is required")));
            }
        }
        Ok(())
    }

    fn into_request(self) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(self.language, self.version, self.code)
            .with_compile_limits(ResourceLimits::from_raw(
                self.compile_timeout,
                self.compile_cpu_timeout,
                self.compile_memory_limit_kb,
            ))
            .with_run_limits(ResourceLimits::from_raw(
                self.run_timeout,
                self.run_cpu_timeout,
                self.run_memory_limit_kb,
            ));
        request.filename = self.filename.filter(|name| !name.is_empty());
        request
    }
}

/// Body of `POST /pack`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PackBody {
    pub language: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub runner_result: Arc<ExecutionResult>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute_handler))
        .route("/pack", post(pack_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Decode a JSON body, telling an empty body apart from a malformed one
fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::invalid_request("request body is empty"));
    }
    Ok(serde_json::from_slice(body)?)
}

#[instrument(skip_all)]
async fn execute_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let body: ExecuteBody = decode(&body)?;
    body.validate()?;
    let request = body.into_request();

    info!(language = %request.language, version = %request.version, "execute request");
    let runner_result = state.executor.execute(&request).await?;
    Ok(Json(ExecuteResponse { runner_result }))
}

#[instrument(skip_all)]
async fn pack_handler(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let body: PackBody = decode(&body)?;
    if body.language.is_empty() || body.version.is_empty() {
        return Err(ApiError::invalid_request("language and version are required"));
    }

    info!(language = %body.language, version = %body.version, "pack request");
    state.languages.pack(&body.language, &body.version).await?;
    Ok(StatusCode::OK)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
