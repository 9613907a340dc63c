use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::services::storage::StorageError;

/// Classified failure of one request. Every pipeline stage either completes or
/// returns exactly one of these, which aborts the rest of the request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("Upload of field '{field}' failed: {source}")]
    UploadFailed {
        field: String,
        #[source]
        source: StorageError,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UploadFailed { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::UploadFailed { .. } => "upload_failed",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the caller.
    fn client_message(&self) -> String {
        match self {
            ApiError::UploadFailed { .. } => "Media upload failed".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::UploadFailed { field, source } => {
                tracing::warn!(field = %field, error = %source, "request failed: upload");
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed: internal");
            }
            other => tracing::debug!(status = status.as_u16(), error = %other, "request rejected"),
        }

        let body = json!({
            "statusCode": status.as_u16(),
            "success": false,
            "message": self.client_message(),
            "error": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return ApiError::Conflict("Resource already exists".to_string());
            }
        }
        ApiError::Internal(format!("Database error: {err}"))
    }
}

/// Successful response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                status_code: status.as_u16(),
                success: status.is_success(),
                message: message.into(),
                data,
            }),
        )
    }

    pub fn ok(message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        Self::new(StatusCode::OK, message, data)
    }

    pub fn created(message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        Self::new(StatusCode::CREATED, message, data)
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_classification() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        let upload = ApiError::UploadFailed {
            field: "video".into(),
            source: StorageError::UploadFailed("boom".into()),
        };
        assert_eq!(upload.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upload.code(), "upload_failed");
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::Internal("jwt secret missing".into());
        assert_eq!(err.client_message(), "Internal server error");

        let upload = ApiError::UploadFailed {
            field: "thumbnail".into(),
            source: StorageError::UploadFailed("403 from backend".into()),
        };
        assert_eq!(upload.client_message(), "Media upload failed");
    }
}
