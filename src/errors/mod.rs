/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error taxonomy for the pipeline. External-dependency failures are expected
/// conditions and are handled close to where they occur; only `Internal` and
/// `InvalidInput` should ever surface past a service boundary.
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum ApiError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider rate limited")]
    ProviderRateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("normalization failed: {0}")]
    Normalization(String),
    #[error("generation service failure: {0}")]
    Generation(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            ApiError::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ApiError::Timeout => "UPSTREAM_TIMEOUT",
            ApiError::Normalization(_) => "NORMALIZATION_ERROR",
            ApiError::Generation(_) => "GENERATION_FAILED",
            ApiError::Persistence(_) => "PERSISTENCE_ERROR",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        // Always return HTTP 200 with ok=false as per requirements
        (StatusCode::OK, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
