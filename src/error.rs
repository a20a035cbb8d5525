use crate::middleware::error_handling;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Malformed input. `field` carries the offending field name so the
    /// response can surface field-level detail.
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("unauthorized")]
    Unauthorized,

    /// Entity is visible to the caller but the required capability is absent.
    #[error("permission denied: missing capability `{0}`")]
    PermissionDenied(&'static str),

    /// Entity absent, or not visible to the caller's tenant/participation.
    /// The two cases are deliberately indistinguishable.
    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A downstream collaborator (cipher, file store, notifier) failed.
    #[error("upstream dependency unavailable: {0}")]
    Unavailable(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether a retry could plausibly succeed (pool exhaustion, I/O).
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            AppError::Unavailable(_) | AppError::Internal => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Unauthorized => 401,
            AppError::PermissionDenied(_) => 403,
            AppError::NotFound => 404,
            AppError::Unavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }
}
