//! # Design
//!
//! - Centralize application-level errors for bootstrap and serving.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Flags or environment failed validation.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: prism_config::ConfigError,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: prism_telemetry::TelemetryError,
    },
    /// A storage backend could not be constructed.
    #[error("storage operation failed")]
    Storage {
        /// Operation identifier.
        operation: &'static str,
        /// Source storage error.
        source: prism_storage::StorageError,
    },
    /// The HTTP loader could not be constructed.
    #[error("loader operation failed")]
    Loader {
        /// Operation identifier.
        operation: &'static str,
        /// Source loader error.
        source: prism_loader::LoaderError,
    },
    /// Engine lifecycle hooks failed.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source image error.
        source: prism_core::ImageError,
    },
    /// The API server failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: prism_api::ApiServerError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: prism_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: prism_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn storage(
        operation: &'static str,
        source: prism_storage::StorageError,
    ) -> Self {
        Self::Storage { operation, source }
    }

    pub(crate) const fn loader(operation: &'static str, source: prism_loader::LoaderError) -> Self {
        Self::Loader { operation, source }
    }

    pub(crate) const fn engine(operation: &'static str, source: prism_core::ImageError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: prism_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn app_errors_keep_constant_messages_and_sources() {
        let err = AppError::config(
            "cli.into_settings",
            prism_config::ConfigError::InvalidField {
                field: "bind",
                reason: "expected an IP address",
                value: Some("localhost".into()),
            },
        );
        assert_eq!(err.to_string(), "configuration operation failed");
        assert!(err.source().is_some());

        let err = AppError::engine("engine.startup", prism_core::ImageError::Pass);
        assert_eq!(err.to_string(), "engine operation failed");
        assert!(matches!(err, AppError::Engine { operation: "engine.startup", .. }));
    }
}
