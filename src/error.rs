//! Error types and error handling for the application
//!
//! Layer errors convert into [`AppError`], which renders as a JSON body
//! `{"error": ..., "status": ...}` with a matching HTTP status.

use crate::agent::AgentError;
use crate::services::ServiceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Request is missing required fields or is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// State or session store failure
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Agent or model failure
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// A handler or background task failed
    #[error("Task failed: {0}")]
    Task(String),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Service(ServiceError::NotStarted(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Agent(AgentError::Model(_)) => StatusCode::BAD_GATEWAY,
            AppError::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
