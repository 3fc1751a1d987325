use crate::upload::UploadError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Missing or empty x-user-id header")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match self {
            ApiError::Upload(UploadError::NotFound(e)) => (StatusCode::NOT_FOUND, e, "NOT_FOUND"),
            ApiError::Upload(UploadError::Forbidden(e)) => (StatusCode::FORBIDDEN, e, "FORBIDDEN"),
            ApiError::Upload(UploadError::InvalidState(e)) => {
                (StatusCode::BAD_REQUEST, e, "INVALID_STATE")
            }
            ApiError::Upload(UploadError::TooLarge(e)) => {
                (StatusCode::PAYLOAD_TOO_LARGE, e, "PAYLOAD_TOO_LARGE")
            }
            ApiError::Upload(UploadError::Upload(e)) => {
                tracing::error!("Cloud provider request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Cloud provider request failed".to_string(),
                    "CLOUD_ERROR",
                )
            }
            ApiError::Upload(UploadError::Unexpected(e)) => {
                tracing::error!("Unexpected error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
            ApiError::InvalidRequest(e) => (StatusCode::BAD_REQUEST, e, "INVALID_REQUEST"),
            ApiError::Multipart(e) => {
                let status = e.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "INVALID_REQUEST"
                };
                (status, e.body_text(), code)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or empty x-user-id header".to_string(),
                "UNAUTHORIZED",
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "code": error_code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
