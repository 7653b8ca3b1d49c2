//! Error types for the IDE server

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// When set, 5xx responses carry a generic message instead of the error text
static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Toggle suppression of internal error details (production mode)
pub fn hide_internal_details(hide: bool) {
    HIDE_INTERNAL_DETAILS.store(hide, Ordering::Relaxed);
}

/// Main error type for the IDE server
#[derive(Debug, Error)]
pub enum Error {
    // Container errors (2000-2999)
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template {0} is missing an image or internal port")]
    TemplateIncomplete(String),

    #[error("Container in invalid state: expected {expected}, got {actual}")]
    InvalidContainerState { expected: String, actual: String },

    #[error("Container {container_id} bound host port {actual:?}, expected {expected}")]
    PortBindingMismatch {
        container_id: String,
        expected: u16,
        actual: Option<u16>,
    },

    #[error("No free host port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    // FileSystem errors (3000-3999)
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Workspace scan failed: {0}")]
    ScanFailed(String),

    // Terminal errors (4000-4999)
    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Command execution failed: {0}")]
    ExecFailed(String),

    #[error("Command timed out")]
    ExecTimeout,

    // Project errors (7000-7999)
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    // Infrastructure errors (6000-6999)
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Docker error: {0}")]
    DockerError(String),

    // General errors (1000-1999)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Container errors (2000-2999)
            Error::ContainerNotFound(_) => 2001,
            Error::TemplateNotFound(_) => 2003,
            Error::InvalidContainerState { .. } => 2004,
            Error::TemplateIncomplete(_) => 2005,
            Error::PortBindingMismatch { .. } => 2006,
            Error::NoFreePort { .. } => 2007,

            // FileSystem errors (3000-3999)
            Error::FileNotFound(_) => 3001,
            Error::FileAlreadyExists(_) => 3002,
            Error::InvalidPath(_) => 3004,
            Error::NotADirectory(_) => 3005,
            Error::ScanFailed(_) => 3007,

            // Terminal errors (4000-4999)
            Error::ExecFailed(_) => 4003,
            Error::ExecTimeout => 4002,
            Error::Terminal(_) => 4101,

            // Project errors (7000-7999)
            Error::ProjectNotFound(_) => 7001,

            // Infrastructure errors (6000-6999)
            Error::DatabaseError(_) => 6001,
            Error::DockerError(_) => 6002,

            // General errors (1000-1999)
            Error::InvalidRequest(_) => 1001,
            Error::InvalidParameter(_) => 1002,
            Error::Internal(_) => 1003,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ContainerNotFound(_)
            | Error::ProjectNotFound(_)
            | Error::FileNotFound(_)
            | Error::TemplateNotFound(_) => StatusCode::NOT_FOUND,

            Error::FileAlreadyExists(_) | Error::InvalidContainerState { .. } => {
                StatusCode::CONFLICT
            }

            Error::InvalidRequest(_)
            | Error::InvalidParameter(_)
            | Error::InvalidPath(_)
            | Error::NotADirectory(_)
            | Error::TemplateIncomplete(_) => StatusCode::BAD_REQUEST,

            Error::ExecTimeout => StatusCode::GATEWAY_TIMEOUT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() && HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed) {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            code: self.code(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::DockerError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
