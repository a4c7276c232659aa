//! Error types for telemetry operations.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while wiring logs or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber is already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A collector could not be defined or added to the registry.
    #[error("metric collector rejected")]
    Metric {
        /// Metric name.
        name: &'static str,
        /// `build` or `register`.
        stage: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// Text exposition could not be encoded.
    #[error("failed to encode metrics exposition")]
    Exposition {
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// Encoded exposition was not UTF-8.
    #[error("metrics exposition was not valid utf-8")]
    ExpositionUtf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn metric(
        name: &'static str,
        stage: &'static str,
        source: PrometheusError,
    ) -> Self {
        Self::Metric {
            name,
            stage,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn messages_stay_constant_and_keep_sources() -> std::result::Result<(), Box<dyn Error>> {
        let utf8 = String::from_utf8(vec![0xff]).err().ok_or("expected utf8 error")?;
        let metric = TelemetryError::metric(
            "http_requests_total",
            "register",
            PrometheusError::AlreadyReg,
        );
        assert_eq!(metric.to_string(), "metric collector rejected");
        assert!(matches!(
            metric,
            TelemetryError::Metric {
                name: "http_requests_total",
                stage: "register",
                ..
            }
        ));
        let utf8 = TelemetryError::ExpositionUtf8 { source: utf8 };
        assert_eq!(utf8.to_string(), "metrics exposition was not valid utf-8");
        assert!(utf8.source().is_some());
        let encode = TelemetryError::Exposition {
            source: PrometheusError::Msg("closed".into()),
        };
        assert!(encode.source().is_some());
        Ok(())
    }
}
