//! API error types and handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("{0}")]
    BadRequest(String),

    // Resource errors
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),

    // Rate limiting
    #[error("too many requests")]
    RateLimited,

    // Internal errors
    #[error("database error: {0}")]
    Database(String),
    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                // SQLite unique-constraint extended result codes.
                if matches!(db_err.code().as_deref(), Some("2067") | Some("1555")) {
                    return ApiError::Conflict("resource already exists".to_string());
                }
                tracing::error!("database error: {:?}", db_err);
                ApiError::Database(db_err.to_string())
            }
            _ => {
                tracing::error!("database error: {:?}", err);
                ApiError::Database(err.to_string())
            }
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
