use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use packrat_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid session token")]
    InvalidToken,

    #[error("Request body is not valid JSON")]
    NotJson,

    #[error("Invalid field: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidToken => {
                tracing::warn!("rejected request with invalid token");
                StatusCode::FORBIDDEN.into_response()
            }
            ApiError::NotJson => StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response(),
            // The body names the offending field so the capture script can
            // report what it sent wrong.
            ApiError::Validation(path) => (StatusCode::BAD_REQUEST, path).into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "storage failure while handling request");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            ApiError::TaskJoin(e) => {
                tracing::error!(error = %e, "blocking task failed while handling request");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
