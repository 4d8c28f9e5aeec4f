use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error shared across crate boundaries.
///
/// Service crates keep their own domain errors and convert into this type
/// at the edge, where it becomes either an HTTP response or a gRPC status.
/// Only client-caused errors carry their message to the caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// A dependency could not be reached. Callers may retry.
    #[error("Service unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Message safe to hand to a remote caller.
    pub fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(err) | AppError::NotFound(err) | AppError::Conflict(err) => {
                err.to_string()
            }
            AppError::Unavailable(_) => "Backend unavailable".to_string(),
            AppError::DatabaseError(_) => "Database error".to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::ConfigError(_) => "Configuration error".to_string(),
        }
    }

    /// Log server-side failures with their full cause chain.
    pub(crate) fn log(&self) {
        match self {
            AppError::BadRequest(_) | AppError::NotFound(_) | AppError::Conflict(_) => {}
            AppError::Unavailable(err) => tracing::warn!(error = %err, "Backend unavailable"),
            AppError::DatabaseError(err) => tracing::error!(error = %err, "Database error"),
            AppError::InternalError(err) => tracing::error!(error = %err, "Internal error"),
            AppError::ConfigError(err) => tracing::error!(error = %err, "Configuration error"),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) | AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
