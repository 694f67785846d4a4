//! Classified API errors
//!
//! Every failure leaving the staging surface is one of four kinds. The kind
//! decides the HTTP status; the title and details are what the caller sees.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Caller-correctable request problem
    #[error("{title}")]
    BadRequest { title: String, details: Vec<String> },

    /// Referenced app, namespace or blob is unknown
    #[error("{0}")]
    NotFound(String),

    /// Unexpected failure talking to the cluster, the pipeline engine or the store
    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Completion deadline exceeded
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Request body over the server limit
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl ApiError {
    pub fn bad_request(title: impl Into<String>) -> Self {
        Self::BadRequest {
            title: title.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        match self {
            Self::BadRequest { title, mut details } => {
                details.push(detail.into());
                Self::BadRequest { title, details }
            }
            other => other,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(source: impl Into<anyhow::Error>, context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Internal error without an underlying cause
    pub fn internal_msg(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Internal {
            context: "internal error".to_string(),
            source: anyhow::anyhow!(message),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Detail strings, joined into one line for the response body
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::BadRequest { details, .. } => details.join(", "),
            Self::Internal { source, .. } => format!("{source:#}"),
            Self::NotFound(_) | Self::Timeout(_) | Self::PayloadTooLarge { .. } => String::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorEntry {
    status: u16,
    title: String,
    details: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let title = match &self {
            Self::Internal { context, .. } => context.clone(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            errors: vec![ErrorEntry {
                status: status.as_u16(),
                title,
                details: self.details(),
            }],
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_kind() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::internal_msg("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Timeout("stage 1".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::PayloadTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn details_accumulate_on_bad_request() {
        let err = ApiError::bad_request("blob app mismatch")
            .with_detail("expected: hello")
            .with_detail("found: other-app");

        assert_eq!(err.to_string(), "blob app mismatch");
        assert_eq!(err.details(), "expected: hello, found: other-app");
    }

    #[test]
    fn internal_carries_context_and_cause() {
        let err = ApiError::internal(anyhow::anyhow!("connection refused"), "querying blob");
        assert_eq!(err.to_string(), "querying blob: connection refused");
        assert!(err.details().contains("connection refused"));
    }
}
