// src/error.rs
//! Error taxonomy for the service and its HTTP mapping.
//!
//! Validation errors short-circuit before any I/O, feed errors abort the whole
//! batch, delegate errors stay inside their own query branch. Malformed model
//! output is not an error at all: `analyze::normalize` degrades it to an empty
//! result.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message returned when `texts` is missing, not an array, or empty.
pub const TEXTS_REQUIRED: &str = "Array of text prompts is required";

/// Feed ingestion failures. All of them abort the batch (the feed is fetched
/// once, before fan-out).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to fetch feed from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("feed is not well-formed XML: {0}")]
    Parse(String),

    #[error("unexpected feed shape: {0}")]
    Shape(String),
}

/// Failures of the external language-model call.
#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("analysis delegate is not configured: {0}")]
    NotConfigured(String),

    #[error("analysis delegate transport error: {0}")]
    Transport(String),

    #[error("analysis delegate returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analysis delegate returned no content")]
    EmptyResponse,

    #[error("analysis delegate timed out after {0}s")]
    Timeout(u64),
}

/// Errors that reach the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn texts_required() -> Self {
        AppError::Validation(TEXTS_REQUIRED.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Feed(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(msg) => json!({ "error": msg }),
            other => {
                tracing::error!(error = %other, "request failed");
                json!({
                    "error": other.to_string(),
                    "status": "error",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_and_feed_to_500() {
        assert_eq!(AppError::texts_required().status(), StatusCode::BAD_REQUEST);
        let feed = AppError::from(FeedError::Shape("no channel".into()));
        assert_eq!(feed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(feed.to_string(), "unexpected feed shape: no channel");
    }
}
