use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::io;

/// Custom error type for e2e_control startup and maintenance operations
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Body returned with every non-200 response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Errors a handler can answer with. Stage failures are not errors here,
/// they travel inside a 200 `DeployResult`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or invalid Bearer token")]
    Unauthorized,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Detail stays in the server log, the caller gets a generic message.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (kind, message) = match self {
            ApiError::Unauthorized => {
                ("unauthorized", "Missing or invalid Bearer token".to_string())
            }
            ApiError::Validation(msg) => ("validation_error", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                ("internal_error", "Internal server error".to_string())
            }
        };

        let body = Json(ErrorBody {
            error: kind,
            message,
        });

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
