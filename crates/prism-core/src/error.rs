//! Error taxonomy shared by every pipeline stage.
//!
//! # Design
//! - Constant error messages; request context lives in structured fields.
//! - `ImageError` is `Clone` so one terminal outcome can be handed to every
//!   caller sharing a single-flight group. Sources are held behind `Arc`.
//! - `ErrorKind` is the taxonomy the transport maps to statuses; every variant
//!   of `ImageError` projects onto exactly one kind.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Result alias for pipeline operations.
pub type ImageResult<T> = Result<T, ImageError>;

/// Shared, cloneable source error.
pub type SharedSource = Arc<dyn Error + Send + Sync>;

/// Classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or a path outside the configured scope.
    Invalid,
    /// The requested object does not exist.
    NotFound,
    /// The object exists but is past its expiration.
    Expired,
    /// The request signature did not verify.
    SignatureMismatch,
    /// The source is not permitted by policy.
    Unauthorized,
    /// A deadline elapsed or the request was canceled.
    Timeout,
    /// No processor can handle the request.
    Unsupported,
    /// A backend declined; the next one in the chain should be tried.
    Pass,
    /// A remote source failed with a non-404 status.
    Upstream,
    /// Backend I/O or encoding failure.
    Internal,
}

impl ErrorKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::SignatureMismatch => "signature_mismatch",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::Pass => "pass",
            Self::Upstream => "upstream",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors produced while resolving, loading, processing, or storing images.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// Request or path failed validation.
    #[error("invalid image request")]
    Invalid {
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Nothing is stored under the requested path.
    #[error("image not found")]
    NotFound {
        /// Logical path that was requested.
        path: String,
    },
    /// A stored entry outlived its expiration.
    #[error("stored image expired")]
    Expired {
        /// Logical path that was requested.
        path: String,
    },
    /// Signature verification failed.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// Source rejected by an allow-list or network policy.
    #[error("image source not allowed")]
    Unauthorized {
        /// Static reason for the rejection.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A stage deadline elapsed.
    #[error("deadline exceeded")]
    Timeout {
        /// Stage that timed out.
        stage: &'static str,
    },
    /// The request context was canceled.
    #[error("request canceled")]
    Canceled {
        /// Stage that observed the cancellation.
        stage: &'static str,
    },
    /// The operation or format is not supported.
    #[error("unsupported image operation")]
    Unsupported {
        /// Operation that is unsupported.
        operation: &'static str,
        /// Value that triggered the failure when available.
        value: Option<String>,
    },
    /// Backend declined the request.
    #[error("backend declined request")]
    Pass,
    /// Remote source answered with a failure status.
    #[error("upstream source failure")]
    Upstream {
        /// Status code returned by the source.
        status: u16,
    },
    /// Backend I/O or codec failure.
    #[error("image backend failure")]
    Backend {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying error.
        source: SharedSource,
    },
}

impl ImageError {
    /// Project the error onto the shared taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::SignatureMismatch => ErrorKind::SignatureMismatch,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Timeout { .. } | Self::Canceled { .. } => ErrorKind::Timeout,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Pass => ErrorKind::Pass,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Backend { .. } => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same stage may succeed.
    ///
    /// Only stage deadlines qualify; a canceled context stays canceled.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Build an `Invalid` error with an offending value.
    #[must_use]
    pub fn invalid(reason: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            reason,
            value: Some(value.into()),
        }
    }

    /// Build a scope violation for a path that resolves outside its sandbox.
    #[must_use]
    pub fn out_of_scope(path: impl Into<String>) -> Self {
        Self::invalid("path_out_of_scope", path)
    }

    /// Build a `NotFound` error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Build an `Unauthorized` error with an offending value.
    #[must_use]
    pub fn unauthorized(reason: &'static str, value: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason,
            value: Some(value.into()),
        }
    }

    /// Build an `Unsupported` error with an offending value.
    #[must_use]
    pub fn unsupported(operation: &'static str, value: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            value: Some(value.into()),
        }
    }

    /// Wrap a backend failure.
    #[must_use]
    pub fn backend(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Backend {
            operation,
            source: Arc::from(source.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn kinds_cover_every_variant() {
        let cases = vec![
            (ImageError::invalid("bad", "x"), ErrorKind::Invalid),
            (ImageError::not_found("a.png"), ErrorKind::NotFound),
            (
                ImageError::Expired {
                    path: "a.png".into(),
                },
                ErrorKind::Expired,
            ),
            (ImageError::SignatureMismatch, ErrorKind::SignatureMismatch),
            (
                ImageError::unauthorized("host", "evil.test"),
                ErrorKind::Unauthorized,
            ),
            (ImageError::Timeout { stage: "load" }, ErrorKind::Timeout),
            (ImageError::Canceled { stage: "load" }, ErrorKind::Timeout),
            (
                ImageError::unsupported("filter", "sepia"),
                ErrorKind::Unsupported,
            ),
            (ImageError::Pass, ErrorKind::Pass),
            (ImageError::Upstream { status: 500 }, ErrorKind::Upstream),
            (
                ImageError::backend("read", io::Error::other("disk")),
                ErrorKind::Internal,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err:?}");
        }
    }

    #[test]
    fn only_stage_timeouts_are_retryable() {
        assert!(ImageError::Timeout { stage: "process" }.is_retryable());
        assert!(!ImageError::Canceled { stage: "process" }.is_retryable());
        assert!(!ImageError::not_found("x").is_retryable());
    }

    #[test]
    fn messages_are_constant_and_sources_survive_clone() {
        let err = ImageError::backend("write", io::Error::other("disk full"));
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), "image backend failure");
        assert!(cloned.source().is_some());
        assert_eq!(
            ImageError::out_of_scope("/etc/passwd").to_string(),
            "invalid image request"
        );
        assert_eq!(ErrorKind::SignatureMismatch.to_string(), "signature_mismatch");
    }
}
