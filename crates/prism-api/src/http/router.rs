//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::Request, routing::get};
use prism_config::ServerSettings;
use prism_engine::Engine;
use prism_telemetry::{Metrics, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::HEADER_REQUEST_ID;
use crate::http::health::{banner, healthcheck, metrics as render_metrics};
use crate::http::image::serve_image;
use crate::http::params::params;
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Axum router wrapper hosting the image endpoints.
#[derive(Debug, Clone)]
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over `engine`.
    ///
    /// `forward_headers` lets client request headers reach the loaders.
    #[must_use]
    pub fn new(
        engine: Engine,
        metrics: Metrics,
        server: ServerSettings,
        forward_headers: bool,
    ) -> Self {
        let params_endpoint = server.params_endpoint;
        let state = Arc::new(ApiState {
            engine,
            metrics: metrics.clone(),
            server,
            forward_headers,
        });
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(prism_telemetry::propagate_request_id_layer())
            .layer(prism_telemetry::set_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(metrics));

        let mut router = Router::new()
            .route("/", get(banner))
            .route("/healthcheck", get(healthcheck))
            .route("/metrics", get(render_metrics));
        if params_endpoint {
            router = router.route("/params/{*path}", get(params));
        }
        let router = router
            .route("/{*path}", get(serve_image))
            .route_layer(layered)
            .with_state(state);
        Self { router }
    }

    /// The assembled router, for embedding or in-process requests.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `addr` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns `Bind` when the listener cannot be opened and `Serve` when
    /// the server stops with an IO error.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        tracing::info!(addr = %addr, "serving images");
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}
