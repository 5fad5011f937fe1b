//! API error types.

use crate::identity::IdentityError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cinderbox_engine::EngineError;
use cinderbox_registry::RegistryError;
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ApiError {
    /// Get the wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_argument",
            Self::Unauthorized(_) => "not_authorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
            Self::Engine(e) => e.code(),
            Self::Identity(e) => e.code(),
            Self::Registry(e) => match e {
                RegistryError::NotFound(_) => "not_found",
                RegistryError::AlreadyExists(_) => "conflict",
                _ => "internal",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => match e {
                EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                EngineError::NotAuthorized(_) => StatusCode::FORBIDDEN,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) => StatusCode::CONFLICT,
                EngineError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::ExecTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Identity(e) => e.status_code(),
            Self::Registry(e) => match e {
                RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
