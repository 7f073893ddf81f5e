//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::sync::SyncError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Sync(err) => match err {
                SyncError::UnknownProcessor(_) | SyncError::JobNotFound(_) => StatusCode::NOT_FOUND,
                SyncError::InvalidHeaders { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                SyncError::InvalidChunkSize | SyncError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                SyncError::InvalidTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            match self {
                AppError::Internal(message) => message,
                _ => "An internal error occurred".to_string(),
            }
        } else {
            match self {
                AppError::Sync(err) => err.to_string(),
                AppError::NotFound(message)
                | AppError::BadRequest(message)
                | AppError::Validation(message)
                | AppError::Conflict(message)
                | AppError::Internal(message) => message,
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sync::{JobKey, Status};

    #[test]
    fn test_sync_errors_map_to_statuses() {
        let cases = [
            (SyncError::UnknownProcessor("x".into()), StatusCode::NOT_FOUND),
            (SyncError::JobNotFound(JobKey::import(1)), StatusCode::NOT_FOUND),
            (
                SyncError::InvalidHeaders {
                    missing: vec!["email".into()],
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                SyncError::InvalidTransition {
                    key: JobKey::import(1),
                    from: Status::Completed,
                    to: Status::Stopping,
                },
                StatusCode::CONFLICT,
            ),
            (SyncError::InvalidPath("../x".into()), StatusCode::BAD_REQUEST),
            (SyncError::Blob("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_body_hides_internal_details() {
        use http_body_util::BodyExt;

        let response = AppError::from(SyncError::Blob("secret bucket".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["status"], 500);
        assert!(!body["error"]["message"].as_str().unwrap().contains("secret"));
    }
}
