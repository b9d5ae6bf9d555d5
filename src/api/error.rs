//! HTTP error mapping: every failure becomes a JSON `{error, message}` body
//! with the status the error class implies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::domain::PharmaOpsError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: String) -> Self {
        Self {
            status,
            body: ErrorBody { error, message },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message.into())
    }
}

impl From<PharmaOpsError> for ApiError {
    fn from(err: PharmaOpsError) -> Self {
        let (status, kind) = match &err {
            PharmaOpsError::Validation(_) | PharmaOpsError::Normalization(_) => {
                (StatusCode::BAD_REQUEST, "validation")
            }
            PharmaOpsError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth"),
            PharmaOpsError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            PharmaOpsError::UpstreamClient { .. }
            | PharmaOpsError::UpstreamProtocol { .. }
            | PharmaOpsError::Network(_)
            | PharmaOpsError::BrowserHarvest { .. } => (StatusCode::BAD_GATEWAY, "upstream"),
            PharmaOpsError::TaskNotFound(_) | PharmaOpsError::DrugNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            PharmaOpsError::Persistence(_) | PharmaOpsError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            error!("request failed: {}", err);
        }

        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PharmaOpsError::validation("x"), StatusCode::BAD_REQUEST),
            (PharmaOpsError::auth("x"), StatusCode::UNAUTHORIZED),
            (
                PharmaOpsError::RateLimited { retry_after_secs: 5 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                PharmaOpsError::UpstreamClient {
                    status: 500,
                    body_excerpt: String::new(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (PharmaOpsError::browser("x"), StatusCode::BAD_GATEWAY),
            (
                PharmaOpsError::TaskNotFound("t".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                PharmaOpsError::persistence("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (PharmaOpsError::Cancelled, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status, expected);
        }
    }
}
