use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Body returned when a client exceeds its request budget
pub const RATE_LIMITED_DETAIL: &str = "Too Many Requests - Rate Limit Exceeded";

/// Body returned when a handler faults
pub const INTERNAL_ERROR_DETAIL: &str = "Internal Server Error";

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Client exhausted its token bucket
    #[error("rate limit exceeded")]
    RateLimited,

    /// Malformed query parameters
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::RateLimited => rate_limited_response(),
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": msg }))).into_response()
            }
            Self::Store(e) => {
                tracing::error!(error = %e, "Store error while serving request");
                internal_error_response()
            }
        }
    }
}

/// Fixed 429 response
pub fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "detail": RATE_LIMITED_DETAIL })),
    )
        .into_response()
}

/// Fixed 500 response
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": INTERNAL_ERROR_DETAIL })),
    )
        .into_response()
}
