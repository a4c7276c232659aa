//! # Design
//!
//! - Construction-time failures only; runtime failures use `ImageError`.
//! - Constant messages with the offending field and value in context.

use thiserror::Error;

/// Result alias for storage construction.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised while configuring a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A blacklist pattern failed to compile.
    #[error("storage pattern invalid")]
    InvalidPattern {
        /// Configuration field carrying the pattern.
        field: &'static str,
        /// Pattern that failed to compile.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
    /// A configuration value was rejected.
    #[error("storage configuration invalid")]
    InvalidConfig {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}
