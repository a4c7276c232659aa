//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collector registration stays private; callers get typed recording helpers.
//! - Result-cache lookups are split by outcome so an expired entry is
//!   distinguishable from a cold miss.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};

/// Outcome of a result-storage lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A stored result was served.
    Hit,
    /// Nothing usable was stored.
    Miss,
    /// A stored result had outlived its expiration.
    Expired,
}

impl CacheOutcome {
    /// Label value used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Expired => "expired",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    result_cache_lookups_total: IntCounterVec,
    loader_attempts_total: IntCounterVec,
    processor_attempts_total: IntCounterVec,
    singleflight_shared_total: IntCounter,
    side_effect_failures_total: IntCounterVec,
    process_duration_ms: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::metric(name, "build", source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::metric(name, "register", source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let result_cache_lookups_total = counter_vec(
            "result_cache_lookups_total",
            "Result storage lookups by outcome",
            &["outcome"],
        )?;
        let loader_attempts_total = counter_vec(
            "loader_attempts_total",
            "Loader and storage fetch attempts by backend and outcome",
            &["loader", "outcome"],
        )?;
        let processor_attempts_total = counter_vec(
            "processor_attempts_total",
            "Processor chain attempts by outcome",
            &["outcome"],
        )?;
        let side_effect_failures_total = counter_vec(
            "side_effect_failures_total",
            "Best-effort writes that failed",
            &["operation"],
        )?;
        let singleflight_shared_total = IntCounter::with_opts(Opts::new(
            "singleflight_shared_total",
            "Requests that joined an in-flight computation",
        ))
        .map_err(|source| TelemetryError::metric("singleflight_shared_total", "build", source))?;
        let process_duration_ms = IntGauge::with_opts(Opts::new(
            "process_duration_ms",
            "Duration of the latest processing stage (ms)",
        ))
        .map_err(|source| TelemetryError::metric("process_duration_ms", "build", source))?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(
            &registry,
            "result_cache_lookups_total",
            &result_cache_lookups_total,
        )?;
        register(&registry, "loader_attempts_total", &loader_attempts_total)?;
        register(
            &registry,
            "processor_attempts_total",
            &processor_attempts_total,
        )?;
        register(
            &registry,
            "singleflight_shared_total",
            &singleflight_shared_total,
        )?;
        register(
            &registry,
            "side_effect_failures_total",
            &side_effect_failures_total,
        )?;
        register(&registry, "process_duration_ms", &process_duration_ms)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                result_cache_lookups_total,
                loader_attempts_total,
                processor_attempts_total,
                singleflight_shared_total,
                side_effect_failures_total,
                process_duration_ms,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record a result-storage lookup.
    pub fn inc_cache_lookup(&self, outcome: CacheOutcome) {
        self.inner
            .result_cache_lookups_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record one loader attempt; `outcome` is `ok` or an error kind.
    pub fn inc_loader_attempt(&self, loader: &str, outcome: &str) {
        self.inner
            .loader_attempts_total
            .with_label_values(&[loader, outcome])
            .inc();
    }

    /// Record one processor chain attempt; `outcome` is `ok` or an error kind.
    pub fn inc_processor_attempt(&self, outcome: &str) {
        self.inner
            .processor_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a request that joined an in-flight computation.
    pub fn inc_singleflight_shared(&self) {
        self.inner.singleflight_shared_total.inc();
    }

    /// Record a failed best-effort write.
    pub fn inc_side_effect_failure(&self, operation: &str) {
        self.inner
            .side_effect_failures_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record the duration of the latest processing stage.
    pub fn observe_process_duration(&self, duration: Duration) {
        self.inner
            .process_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Current value of `result_cache_lookups_total` for `outcome`.
    #[must_use]
    pub fn cache_lookups(&self, outcome: CacheOutcome) -> u64 {
        self.inner
            .result_cache_lookups_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Current value of `singleflight_shared_total`.
    #[must_use]
    pub fn singleflight_shared(&self) -> u64 {
        self.inner.singleflight_shared_total.get()
    }

    /// Current value of `side_effect_failures_total` for `operation`.
    #[must_use]
    pub fn side_effect_failures(&self, operation: &str) -> u64 {
        self.inner
            .side_effect_failures_total
            .with_label_values(&[operation])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionUtf8 { source })
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn counters_reflect_updates_and_render() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/{*path}", 200);
        metrics.inc_cache_lookup(CacheOutcome::Hit);
        metrics.inc_cache_lookup(CacheOutcome::Expired);
        metrics.inc_cache_lookup(CacheOutcome::Expired);
        metrics.inc_loader_attempt("http", "not_found");
        metrics.inc_processor_attempt("ok");
        metrics.inc_singleflight_shared();
        metrics.inc_side_effect_failure("result_put");
        metrics.observe_process_duration(Duration::from_millis(42));

        assert_eq!(metrics.cache_lookups(CacheOutcome::Hit), 1);
        assert_eq!(metrics.cache_lookups(CacheOutcome::Expired), 2);
        assert_eq!(metrics.cache_lookups(CacheOutcome::Miss), 0);
        assert_eq!(metrics.singleflight_shared(), 1);
        assert_eq!(metrics.side_effect_failures("result_put"), 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("result_cache_lookups_total{outcome=\"expired\"} 2"));
        assert!(rendered.contains("loader_attempts_total"));
        assert!(rendered.contains("process_duration_ms 42"));
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_singleflight_shared();
        assert_eq!(second.singleflight_shared(), 0);
        Ok(())
    }
}
