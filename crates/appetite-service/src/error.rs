//! Error types for appetited

use appetite_core::AppetiteError;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Startup and lifecycle errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error(transparent)]
    Core(#[from] AppetiteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request errors, rendered as `{ error, code }`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing tenant claim: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Core(#[from] AppetiteError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Core(err) => match err {
                AppetiteError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                AppetiteError::CrossTenant { .. } => (StatusCode::FORBIDDEN, "CROSS_TENANT_ACCESS"),
                AppetiteError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                AppetiteError::NoActiveAppetite(_) => (StatusCode::CONFLICT, "NO_ACTIVE_APPETITE"),
                AppetiteError::MetricResolution { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "METRIC_RESOLUTION_ERROR")
                }
                AppetiteError::Timeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "TIMEOUT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        let cases = [
            (
                ApiError::Core(AppetiteError::validation("bad pairing")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Unauthorized("x-tenant-id".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::Core(AppetiteError::CrossTenant {
                    claimed: "a".to_string(),
                    requested: "b".to_string(),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Core(AppetiteError::NotFound("breach".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Core(AppetiteError::NoActiveAppetite("t1".to_string())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Core(AppetiteError::Storage("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_validation_code() {
        let (_, code) = ApiError::Core(AppetiteError::validation("x")).status_and_code();
        assert_eq!(code, "VALIDATION_ERROR");
    }
}
