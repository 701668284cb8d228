//! # Error Handling Module
//!
//! Structured error type for every tracker operation. Each variant maps to an
//! HTTP status and a machine-readable code so handlers can simply use `?`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Result type alias for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(String),

    /// JSON parsing or serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed request body or invalid field value
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A mandatory request field was absent or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Schema migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Caller is not authenticated
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but may not touch the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource conflict (e.g., username already taken)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl TrackerError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrackerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrackerError::Json(_) => StatusCode::BAD_REQUEST,
            TrackerError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            TrackerError::MissingField(_) => StatusCode::BAD_REQUEST,
            TrackerError::MigrationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrackerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TrackerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TrackerError::Forbidden(_) => StatusCode::FORBIDDEN,
            TrackerError::Conflict(_) => StatusCode::CONFLICT,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Returns a machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            TrackerError::Database(_) => "DATABASE_ERROR",
            TrackerError::Json(_) => "JSON_ERROR",
            TrackerError::InvalidPayload(_) => "INVALID_PAYLOAD",
            TrackerError::MissingField(_) => "MISSING_FIELD",
            TrackerError::MigrationFailed(_) => "MIGRATION_FAILED",
            TrackerError::Internal(_) => "INTERNAL_ERROR",
            TrackerError::Unauthorized(_) => "UNAUTHORIZED",
            TrackerError::Forbidden(_) => "FORBIDDEN",
            TrackerError::Conflict(_) => "CONFLICT",
            TrackerError::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        TrackerError::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TrackerError::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        TrackerError::InvalidPayload(msg.into())
    }
}

/// Converts TrackerError into an Axum HTTP response
impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("{} request failed: {}", status, self);
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            },
            "success": false,
        }));

        (status, body).into_response()
    }
}

/// Malformed or mistyped JSON bodies share the regular error envelope
impl From<JsonRejection> for TrackerError {
    fn from(rejection: JsonRejection) -> Self {
        TrackerError::InvalidPayload(rejection.body_text())
    }
}

/// True when `err` is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Unique violations become `Conflict`; everything else is a storage error
impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            TrackerError::Conflict(err.to_string())
        } else {
            TrackerError::Database(err.to_string())
        }
    }
}

impl From<tokio_rusqlite::Error> for TrackerError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            other => TrackerError::Database(other.to_string()),
        }
    }
}
