//! Shared handler state.

use prism_config::ServerSettings;
use prism_engine::Engine;
use prism_telemetry::Metrics;

/// State cloned into every handler through an `Arc`.
#[derive(Debug)]
pub(crate) struct ApiState {
    pub(crate) engine: Engine,
    pub(crate) metrics: Metrics,
    pub(crate) server: ServerSettings,
    /// Whether client request headers reach the loaders.
    pub(crate) forward_headers: bool,
}

impl ApiState {
    /// Request path with the configured prefix removed, or `None` outside it.
    pub(crate) fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.server.path_prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}
