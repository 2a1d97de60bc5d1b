use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courseforge_pipeline::QuotaError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        Self::NotFound(format!("{entity} not found or access denied"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "detail": message })))
                    .into_response()
            }
            Self::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "detail": message })))
                    .into_response()
            }
            Self::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(serde_json::json!({ "detail": message })))
                    .into_response()
            }
            Self::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({ "detail": message })))
                    .into_response()
            }
            Self::Quota(quota) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "LIMIT_REACHED",
                    "code": quota.code(),
                    "limit": quota.limit(),
                    "message": quota.to_string(),
                })),
            )
                .into_response(),
            Self::Internal(error) => {
                tracing::error!("internal error: {error:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "detail": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
