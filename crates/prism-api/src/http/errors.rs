//! RFC9457-style problem responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use prism_core::{ErrorKind, ImageError};
use serde::Serialize;

use crate::http::constants::{
    NO_CACHE, PROBLEM_FORBIDDEN, PROBLEM_INTERNAL, PROBLEM_INVALID, PROBLEM_NOT_FOUND,
    PROBLEM_SIGNATURE, PROBLEM_TIMEOUT, PROBLEM_UNSUPPORTED, PROBLEM_UPSTREAM,
};

/// Problem document body.
#[derive(Debug, Serialize)]
pub(crate) struct ProblemDetails {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
    pub(crate) title: &'static str,
    pub(crate) status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) detail: Option<String>,
}

/// Error response; always sent with `no-cache` headers.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    kind: &'static str,
    title: &'static str,
    detail: Option<String>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, PROBLEM_NOT_FOUND, "image not found").with_detail(detail)
    }

    /// Status and problem type for an engine error kind.
    const fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Invalid => {
                Self::new(StatusCode::BAD_REQUEST, PROBLEM_INVALID, "invalid request")
            }
            ErrorKind::SignatureMismatch => {
                Self::new(StatusCode::FORBIDDEN, PROBLEM_SIGNATURE, "signature mismatch")
            }
            ErrorKind::Unauthorized => {
                Self::new(StatusCode::FORBIDDEN, PROBLEM_FORBIDDEN, "source not allowed")
            }
            ErrorKind::NotFound => {
                Self::new(StatusCode::NOT_FOUND, PROBLEM_NOT_FOUND, "image not found")
            }
            ErrorKind::Timeout => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                PROBLEM_TIMEOUT,
                "deadline exceeded",
            ),
            ErrorKind::Unsupported => Self::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                PROBLEM_UNSUPPORTED,
                "unsupported image operation",
            ),
            ErrorKind::Upstream => {
                Self::new(StatusCode::BAD_GATEWAY, PROBLEM_UPSTREAM, "upstream failure")
            }
            ErrorKind::Internal | ErrorKind::Pass | ErrorKind::Expired => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                PROBLEM_INTERNAL,
                "internal server error",
            ),
        }
    }
}

impl From<&ImageError> for ApiError {
    fn from(err: &ImageError) -> Self {
        let detail = match err {
            ImageError::Invalid { reason, .. } | ImageError::Unauthorized { reason, .. } => {
                (*reason).to_string()
            }
            other => other.to_string(),
        };
        Self::for_kind(err.kind()).with_detail(detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind,
            title: self.title,
            status: self.status.as_u16(),
            detail: self.detail,
        };
        let mut response = (self.status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        response
    }
}
