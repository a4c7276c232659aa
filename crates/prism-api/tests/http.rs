use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::Response;
use prism_api::ApiServer;
use prism_config::{CacheHeaders, ServerSettings};
use prism_core::{ImageError, Loader, RequestContext};
use prism_engine::{Engine, EngineConfig};
use prism_path::{PathCodec, Signer};
use prism_telemetry::Metrics;
use prism_test_support::{CountingProcessor, MemoryLoader};
use serde_json::Value;
use tower::ServiceExt;

type TestResult = Result<(), Box<dyn Error>>;

fn server_settings() -> ServerSettings {
    ServerSettings {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        path_prefix: "/".to_string(),
        cache: CacheHeaders {
            ttl: Duration::from_secs(600),
            swr: Duration::from_secs(60),
            no_cache: false,
        },
        params_endpoint: true,
    }
}

fn codec() -> PathCodec {
    PathCodec::new(Some(Signer::sha1("secret")), true)
}

struct Harness {
    router: Router,
    metrics: Metrics,
}

fn harness(
    loader: Arc<dyn Loader>,
    processor: bool,
    server: ServerSettings,
) -> Result<Harness, Box<dyn Error>> {
    let metrics = Metrics::new()?;
    let mut builder = Engine::builder(codec())
        .config(EngineConfig::default())
        .loader(loader)
        .metrics(metrics.clone());
    if processor {
        builder = builder.processor(Arc::new(CountingProcessor::new("p")));
    }
    let router = ApiServer::new(builder.build(), metrics.clone(), server, true).into_router();
    Ok(Harness { router, metrics })
}

fn images() -> Arc<dyn Loader> {
    Arc::new(MemoryLoader::new("memory").with_image("a.png", b"src"))
}

async fn get(router: &Router, uri: &str, headers: HeaderMap) -> Result<Response, Box<dyn Error>> {
    let mut request = Request::builder().uri(uri).body(Body::empty())?;
    *request.headers_mut() = headers;
    Ok(router.clone().oneshot(request).await?)
}

async fn text(response: Response) -> Result<String, Box<dyn Error>> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn header<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn serves_processed_images_with_cache_headers() -> TestResult {
    let harness = harness(images(), true, server_settings())?;
    let response = get(&harness.router, "/unsafe/100x50/a.png", HeaderMap::new()).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, header::CONTENT_TYPE), Some("text/plain"));
    assert_eq!(
        header(&response, header::CACHE_CONTROL),
        Some("public, s-maxage=600, max-age=600, no-transform, stale-while-revalidate=60")
    );
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(text(response).await?, "p:100x50:src");
    Ok(())
}

#[tokio::test]
async fn errors_render_problem_documents() -> TestResult {
    let harness = harness(images(), true, server_settings())?;
    let cases = [
        ("/unsafe/100x50/missing.png", StatusCode::NOT_FOUND),
        ("/unsafe/", StatusCode::BAD_REQUEST),
        ("/abcdefghijklmnopqrstuvwxyz01/100x50/a.png", StatusCode::FORBIDDEN),
    ];
    for (uri, status) in cases {
        let response = get(&harness.router, uri, HeaderMap::new()).await?;
        assert_eq!(response.status(), status, "{uri}");
        assert_eq!(
            header(&response, header::CACHE_CONTROL),
            Some("private, no-cache, no-store, must-revalidate")
        );
        let problem: Value = serde_json::from_str(&text(response).await?)?;
        assert_eq!(problem["status"], status.as_u16());
        assert!(problem["type"].as_str().is_some_and(|kind| kind.starts_with("https://")));
    }
    Ok(())
}

#[tokio::test]
async fn upstream_failures_map_to_bad_gateway() -> TestResult {
    let loader = Arc::new(MemoryLoader::failing(
        "remote",
        ImageError::Upstream { status: 503 },
    ));
    let harness = harness(loader, true, server_settings())?;
    let response = get(&harness.router, "/unsafe/a.png", HeaderMap::new()).await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    Ok(())
}

#[tokio::test]
async fn matching_if_none_match_yields_not_modified() -> TestResult {
    let harness = harness(images(), false, server_settings())?;
    let first = get(&harness.router, "/unsafe/a.png", HeaderMap::new()).await?;
    assert_eq!(first.status(), StatusCode::OK);
    let tag = header(&first, header::ETAG).ok_or("etag missing")?.to_string();
    assert!(header(&first, header::LAST_MODIFIED).is_some());

    let mut headers = HeaderMap::new();
    headers.insert(header::IF_NONE_MATCH, tag.parse()?);
    let second = get(&harness.router, "/unsafe/a.png", headers).await?;
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&second, header::ETAG), Some(tag.as_str()));
    assert!(text(second).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn params_endpoint_returns_parsed_params() -> TestResult {
    let harness = harness(images(), true, server_settings())?;
    let response = get(
        &harness.router,
        "/params/unsafe/fit-in/-100x50/a.png",
        HeaderMap::new(),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let params: Value = serde_json::from_str(&text(response).await?)?;
    assert_eq!(params["image"], "a.png");
    assert_eq!(params["width"], 100);
    assert_eq!(params["fit_in"], true);
    assert_eq!(params["h_flip"], true);

    let disabled = harness_without_params()?;
    let response = get(&disabled, "/params/unsafe/100x50/a.png", HeaderMap::new()).await?;
    assert_ne!(response.status(), StatusCode::OK);
    Ok(())
}

fn harness_without_params() -> Result<Router, Box<dyn Error>> {
    let server = ServerSettings {
        params_endpoint: false,
        ..server_settings()
    };
    Ok(harness(images(), true, server)?.router)
}

#[tokio::test]
async fn path_prefix_is_stripped() -> TestResult {
    let server = ServerSettings {
        path_prefix: "/img/".to_string(),
        ..server_settings()
    };
    let harness = harness(images(), true, server)?;
    let inside = get(&harness.router, "/img/unsafe/10x10/a.png", HeaderMap::new()).await?;
    assert_eq!(inside.status(), StatusCode::OK);
    assert_eq!(text(inside).await?, "p:10x10:src");
    let outside = get(&harness.router, "/unsafe/10x10/a.png", HeaderMap::new()).await?;
    assert_eq!(outside.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn service_endpoints_respond() -> TestResult {
    let harness = harness(images(), true, server_settings())?;
    let banner = get(&harness.router, "/", HeaderMap::new()).await?;
    assert_eq!(banner.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&text(banner).await?)?;
    assert!(body["prism"]["version"].is_string());

    let health = get(&harness.router, "/healthcheck", HeaderMap::new()).await?;
    assert_eq!(text(health).await?, "ok");

    get(&harness.router, "/unsafe/100x50/a.png", HeaderMap::new()).await?;
    let metrics = get(&harness.router, "/metrics", HeaderMap::new()).await?;
    assert_eq!(metrics.status(), StatusCode::OK);
    let exposition = text(metrics).await?;
    assert!(exposition.contains("http_requests_total"));
    assert!(exposition.contains("loader_attempts_total"));
    assert!(harness.metrics.render()?.contains("/{*path}"));
    Ok(())
}

#[tokio::test]
async fn client_headers_reach_the_loader_context() -> TestResult {
    let loader = Arc::new(HeaderEcho);
    let harness = harness(loader, false, server_settings())?;
    let mut headers = HeaderMap::new();
    headers.insert("x-tenant", "acme".parse()?);
    let response = get(&harness.router, "/unsafe/a.png", headers).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await?, "acme");
    Ok(())
}

#[derive(Debug)]
struct HeaderEcho;

#[async_trait::async_trait]
impl Loader for HeaderEcho {
    fn name(&self) -> &str {
        "echo"
    }

    async fn get(
        &self,
        ctx: &RequestContext,
        _image: &str,
    ) -> Result<prism_core::Blob, ImageError> {
        let tenant = ctx.header("x-tenant").unwrap_or("none").to_string();
        Ok(prism_core::Blob::from_bytes(tenant.into_bytes()).with_content_type("text/plain"))
    }

    fn path(&self, image: &str) -> Option<String> {
        Some(image.to_string())
    }
}
