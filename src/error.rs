//! # Error Handling
//!
//! The HTTP-facing error type and its conversion into JSON responses.
//!
//! Errors here cover the REST surface only. The streaming path has its own
//! taxonomy handled in `websocket.rs`: transport errors terminate exactly
//! their session, per-window classification failures are logged and skipped,
//! and neither ever becomes an HTTP response.
//!
//! ## JSON Response Format:
//! Every error renders with a consistent body:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Overlap (1000 ms) must be shorter than the window (1000 ms)",
//!     "timestamp": "2026-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error categories for the REST surface.
///
/// ## Status Code Mapping:
/// - `Internal` / `ConfigError` → 500
/// - `BadRequest` / `ValidationError` → 400
#[derive(Debug)]
pub enum AppError {
    /// Something went wrong on our side (model failure, I/O, poisoned state)
    Internal(String),

    /// The request itself was malformed (bad JSON, missing multipart field)
    BadRequest(String),

    /// Configuration could not be loaded or applied
    ConfigError(String),

    /// Well-formed input that violates a rule (wrong WAV format, bad ranges)
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Classifier and model errors surface as internal errors; the detail stays
/// in the message for the logs and the response body.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON that fails to parse came from the client, so it maps to 400 rather
/// than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// I/O failures while reading uploads or model files.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Shorthand for handler return types.
pub type AppResult<T> = Result<T, AppError>;
