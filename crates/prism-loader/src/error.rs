//! # Design
//!
//! - Construction-time failures only; request failures use `ImageError`.
//! - Constant messages; the offending field and value travel as context.

use thiserror::Error;

/// Result alias for loader construction.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised while building a loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A glob pattern failed to compile.
    #[error("loader glob pattern invalid")]
    InvalidGlob {
        /// Configuration field carrying the pattern.
        field: &'static str,
        /// Pattern that failed to compile.
        pattern: String,
        /// Underlying glob error.
        source: globset::Error,
    },
    /// A regular expression failed to compile.
    #[error("loader regex invalid")]
    InvalidRegex {
        /// Configuration field carrying the expression.
        field: &'static str,
        /// Expression that failed to compile.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
    /// A URL setting could not be parsed.
    #[error("loader url invalid")]
    InvalidUrl {
        /// Configuration field carrying the URL.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
    /// The HTTP client could not be constructed.
    #[error("loader http client build failed")]
    Client {
        /// Underlying client error.
        source: reqwest::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn loader_error_messages_are_constant() {
        let Err(source) = url::Url::parse("not a url") else {
            panic!("expected parse failure");
        };
        let err = LoaderError::InvalidUrl {
            field: "base_url",
            value: "not a url".into(),
            source,
        };
        assert_eq!(err.to_string(), "loader url invalid");
        assert!(err.source().is_some());
    }
}
