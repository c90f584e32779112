//! Error types for the REST server
//!
//! Provides structured error handling using thiserror for every failure a
//! request can hit, from id validation through storage I/O, plus the
//! configuration errors raised at startup.

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for repository operations
#[derive(Error, Debug)]
pub enum RestError {
    /// Object missing, or the path names an unknown type
    #[error("Not found: {0}")]
    NotFound(String),

    /// Config already initialised, or a lock id is taken
    #[error("Conflict: {0} already exists")]
    Conflict(String),

    /// Identifier outside the accepted alphabet or length
    #[error("Invalid id: {0:?}")]
    InvalidId(String),

    /// Body size disagrees with the declared Content-Length
    #[error("Length mismatch: declared {declared} bytes, received {received}")]
    LengthMismatch { declared: u64, received: u64 },

    /// Malformed request metadata
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or rejected credentials
    #[error("Authentication required")]
    AuthFailure,

    /// No route for this method and path
    #[error("Unsupported request: {method} {path}")]
    Unsupported { method: Method, path: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestError {
    /// HTTP status reported to the client
    pub fn status(&self) -> StatusCode {
        match self {
            RestError::NotFound(_) | RestError::Unsupported { .. } => StatusCode::NOT_FOUND,
            RestError::Conflict(_) => StatusCode::CONFLICT,
            RestError::InvalidId(_)
            | RestError::LengthMismatch { .. }
            | RestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RestError::AuthFailure => StatusCode::UNAUTHORIZED,
            RestError::Config(_) | RestError::Io(_) | RestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = format!("{}\n", self);

        if let RestError::AuthFailure = self {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"restic\"")],
                message,
            )
                .into_response();
        }

        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], message).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RestError>;
