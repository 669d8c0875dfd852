//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how it is
//! rendered to HTTP clients.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ebook_hub_core::{LibraryError, PortError};
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A library operation was refused or failed.
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed request that never reached the library.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Library(e) => match e {
                LibraryError::Unauthenticated(reason) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", reason.to_string())
                }
                LibraryError::Forbidden => {
                    (StatusCode::FORBIDDEN, "FORBIDDEN", "Forbidden".to_string())
                }
                LibraryError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", "Not found".to_string())
                }
                LibraryError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
                }
                LibraryError::DependencyFailure(_) => (
                    StatusCode::BAD_GATEWAY,
                    "DEPENDENCY_FAILURE",
                    "An upstream service failed".to_string(),
                ),
                LibraryError::StoreUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "The library store is unavailable".to_string(),
                ),
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Internal server error".to_string(),
            ),
        }
    }
}

/// Renders `{"error": {"code", "message", "status"}}`. Details of server-side
/// failures go to the log only.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "status": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}
