// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the sync core and the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Token refresh rejected or the upstream refused our credentials.
    #[error("Strava authorization error: {0}")]
    UpstreamAuth(String),

    #[error("Strava rate limit exceeded")]
    UpstreamRateLimit,

    /// Network failures, timeouts and 5xx responses.
    #[error("Strava transient error: {0}")]
    UpstreamTransient(String),

    /// Malformed or unexpected payloads. Not retryable without intervention.
    #[error("Strava data error: {0}")]
    UpstreamData(String),

    #[error("Database error: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable identifier for the error category, recorded on failed jobs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::UpstreamAuth(_) => "upstream_auth",
            AppError::UpstreamRateLimit => "upstream_rate_limit",
            AppError::UpstreamTransient(_) => "upstream_transient",
            AppError::UpstreamData(_) => "upstream_data",
            AppError::Persistence(_) => "persistence",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether a fresh attempt (new job or queue redelivery) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamRateLimit
                | AppError::UpstreamTransient(_)
                | AppError::Persistence(_)
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            AppError::UpstreamAuth(msg)
            | AppError::UpstreamTransient(msg)
            | AppError::UpstreamData(msg) => (StatusCode::BAD_GATEWAY, Some(msg.clone())),
            AppError::UpstreamRateLimit => (StatusCode::TOO_MANY_REQUESTS, None),
            AppError::Persistence(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type Result<T> = std::result::Result<T, AppError>;
