//! Error responses for the HTTP API

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sandrun::{ExecuteError, LangError};
use serde_json::json;
use thiserror::Error;

/// Errors returned by handlers, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to process code: {0}")]
    Execute(#[source] ExecuteError),

    #[error("server overloaded: {0}")]
    Overloaded(#[source] ExecuteError),

    #[error("failed to install package: {0}")]
    Pack(#[from] LangError),
}

impl ApiError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Decode(_) | ApiError::Execute(_) | ApiError::Pack(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ExecuteError> for ApiError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
            ExecuteError::Overloaded(_) => ApiError::Overloaded(err),
            _ => ApiError::Execute(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use sandrun::LimiterError;

    use super::*;

    #[test]
    fn execute_errors_map_to_statuses() {
        let invalid: ApiError = ExecuteError::InvalidRequest("code is required".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.to_string(), "invalid request: code is required");

        let overloaded: ApiError = ExecuteError::Overloaded(LimiterError::Closed).into();
        assert_eq!(overloaded.status(), StatusCode::SERVICE_UNAVAILABLE);

        let unsupported: ApiError = ExecuteError::UnsupportedLanguage("cobol".into()).into();
        assert_eq!(unsupported.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            unsupported.to_string(),
            "failed to process code: unsupported language: cobol"
        );
    }
}
