use crate::error::AppError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Failure envelope: `{success: false, message, error}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: ErrorDetail,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let (error_type, code, field) = match err {
        AppError::Validation { field, .. } => {
            ("validation_error", "INVALID_REQUEST", Some(field.clone()))
        }
        AppError::Unauthorized => ("authentication_error", "INVALID_CREDENTIALS", None),
        AppError::PermissionDenied(capability) => (
            "authorization_error",
            "PERMISSION_DENIED",
            Some((*capability).to_string()),
        ),
        AppError::NotFound => ("not_found_error", "NOT_FOUND", None),
        AppError::Unavailable(_) => ("unavailable_error", "DEPENDENCY_UNAVAILABLE", None),
        AppError::Database(_) => ("server_error", "DATABASE_ERROR", None),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            ("server_error", "INTERNAL_SERVER_ERROR", None)
        }
    };

    // 5xx details stay in the logs, not in the response body
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
        "internal error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        ErrorResponse {
            success: false,
            message,
            error: ErrorDetail {
                error_type,
                code,
                field,
            },
        },
    )
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    let (status, response) = map_error(&err);
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_field_detail() {
        let err = AppError::validation("participants", "too many");
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.field.as_deref(), Some("participants"));
        assert!(!body.success);
    }

    #[test]
    fn database_errors_do_not_leak_detail() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal error");
    }
}
