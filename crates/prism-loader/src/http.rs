//! HTTP(S) loader.
//!
//! # Design
//! - The image path becomes a URL by prepending the base URL, else the default
//!   scheme when the path carries none. A default scheme of `nil` disables
//!   that fallback.
//! - Allow-lists, literal-IP network checks, and the size cap are enforced
//!   before or while reading, never after buffering an unbounded body.
//! - `404` maps to `NotFound`; any other non-success status to `Upstream`.
//! - Blocked destinations surface as `Unauthorized`, so the engine prefers
//!   them over a sibling loader's `NotFound`.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_core::{Blob, ImageError, ImageResult, Loader, RequestContext, Stat};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy, StatusCode};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{LoaderError, LoaderResult};
use crate::policy::{GuardedResolver, NetworkPolicy, is_blocked_error};
use crate::sources::SourceMatcher;

const NO_DEFAULT_SCHEME: &str = "nil";
const SKIPPED_CLIENT_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "accept-encoding",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "te",
    "trailer",
    "proxy-authorization",
];

/// Settings for [`HttpLoader`].
#[derive(Debug, Clone)]
pub struct HttpLoaderConfig {
    /// Request headers copied from the client when present.
    pub forward_headers: Vec<String>,
    /// Response headers carried onto the loaded blob.
    pub override_response_headers: Vec<String>,
    /// Forward every client header except hop-by-hop ones.
    pub forward_client_headers: bool,
    /// Host globs allowed as sources; empty allows all.
    pub allowed_sources: Vec<String>,
    /// URL regexes allowed as sources; combined with the globs as OR.
    pub allowed_source_regexps: Vec<String>,
    /// Body size cap in bytes, zero for none.
    pub max_allowed_size: u64,
    /// Skip TLS certificate verification.
    pub insecure_skip_verify: bool,
    /// URL prepended to every image path.
    pub base_url: Option<String>,
    /// Scheme assumed for paths without one, or `nil`.
    pub default_scheme: String,
    /// `Accept` header, also used to validate the response content type.
    pub accept: String,
    /// Proxies used in rotation.
    pub proxy_urls: Vec<String>,
    /// Hosts routed through the proxies; empty routes every host.
    pub proxy_allowed_sources: Vec<String>,
    /// Destination restrictions.
    pub network_policy: NetworkPolicy,
    /// Transport timeout for one fetch.
    pub timeout: Option<Duration>,
    /// `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            forward_headers: Vec::new(),
            override_response_headers: Vec::new(),
            forward_client_headers: false,
            allowed_sources: Vec::new(),
            allowed_source_regexps: Vec::new(),
            max_allowed_size: 0,
            insecure_skip_verify: false,
            base_url: None,
            default_scheme: "https".to_string(),
            accept: "*/*".to_string(),
            proxy_urls: Vec::new(),
            proxy_allowed_sources: Vec::new(),
            network_policy: NetworkPolicy::default(),
            timeout: None,
            user_agent: format!("prism/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Loader fetching images over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    allowed: Option<SourceMatcher>,
    base_url: Option<Url>,
    default_scheme: Option<String>,
    accept: String,
    accepted_types: Vec<String>,
    forward_headers: Vec<String>,
    forward_client_headers: bool,
    override_response_headers: Vec<String>,
    max_allowed_size: u64,
    policy: Arc<NetworkPolicy>,
}

impl HttpLoader {
    /// Build a loader from `config`.
    ///
    /// # Errors
    ///
    /// Returns a `LoaderError` when a pattern, proxy, or base URL is invalid
    /// or the client cannot be constructed.
    pub fn new(config: HttpLoaderConfig) -> LoaderResult<Self> {
        let allowed = SourceMatcher::new(
            "http_loader_allowed_sources",
            &config.allowed_sources,
            &config.allowed_source_regexps,
        )?;
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| {
                Url::parse(value).map_err(|source| LoaderError::InvalidUrl {
                    field: "http_loader_base_url",
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()?;
        let default_scheme = match config.default_scheme.trim() {
            "" | NO_DEFAULT_SCHEME => None,
            scheme => Some(scheme.trim_end_matches("://").to_ascii_lowercase()),
        };
        let policy = Arc::new(config.network_policy);

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.insecure_skip_verify);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if policy.is_active() {
            builder = builder.dns_resolver(Arc::new(GuardedResolver::new(Arc::clone(&policy))));
        }
        if let Some(proxy) = rotating_proxy(&config.proxy_urls, &config.proxy_allowed_sources)? {
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|source| LoaderError::Client { source })?;

        let accept = if config.accept.trim().is_empty() {
            "*/*".to_string()
        } else {
            config.accept.trim().to_string()
        };
        let accepted_types = accept
            .split(',')
            .filter_map(|entry| entry.split(';').next())
            .map(|entry| entry.trim().to_ascii_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();

        Ok(Self {
            client,
            allowed: (!allowed.is_empty()).then_some(allowed),
            base_url,
            default_scheme,
            accept,
            accepted_types,
            forward_headers: lowercase_csv(&config.forward_headers),
            forward_client_headers: config.forward_client_headers,
            override_response_headers: lowercase_csv(&config.override_response_headers),
            max_allowed_size: config.max_allowed_size,
            policy,
        })
    }

    /// Absolute URL for `image`, or the reason it has none.
    fn source_url(&self, image: &str) -> ImageResult<Url> {
        let raw = if let Some(base) = &self.base_url {
            format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                image.trim_start_matches('/')
            )
        } else if image.contains("://") {
            image.to_string()
        } else if let Some(scheme) = &self.default_scheme {
            format!("{scheme}://{}", image.trim_start_matches('/'))
        } else {
            image.to_string()
        };
        let url = Url::parse(&raw).map_err(|_| ImageError::invalid("source_url_invalid", image))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
            return Err(ImageError::invalid("source_url_invalid", image));
        }
        if let Some(allowed) = &self.allowed
            && !allowed.matches(&url)
        {
            return Err(ImageError::unauthorized("source_not_allowed", url.as_str()));
        }
        let literal = match url.host() {
            Some(Host::Ipv4(v4)) => Some(IpAddr::V4(v4)),
            Some(Host::Ipv6(v6)) => Some(IpAddr::V6(v6)),
            Some(Host::Domain(_)) | None => None,
        };
        if literal.is_some_and(|addr| self.policy.is_blocked(addr)) {
            return Err(ImageError::unauthorized("destination_blocked", url.as_str()));
        }
        Ok(url)
    }

    fn request_headers(&self, ctx: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in ctx.headers() {
            let lowered = name.to_ascii_lowercase();
            let forward = if self.forward_client_headers {
                !SKIPPED_CLIENT_HEADERS.contains(&lowered.as_str())
            } else {
                self.forward_headers.contains(&lowered)
            };
            if !forward {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(lowered.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        if let Ok(accept) = HeaderValue::from_str(&self.accept) {
            headers.insert(reqwest::header::ACCEPT, accept);
        }
        headers
    }

    fn accepts(&self, content_type: Option<&str>) -> bool {
        if self.accepted_types.iter().any(|entry| entry == "*/*") {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.accepted_types.iter().any(|entry| {
            entry == &mime
                || entry
                    .strip_suffix("/*")
                    .is_some_and(|family| mime.split('/').next() == Some(family))
        })
    }

    fn too_large(&self, size: u64) -> bool {
        self.max_allowed_size > 0 && size > self.max_allowed_size
    }
}

fn lowercase_csv(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn rotating_proxy(urls: &[String], allowed_sources: &[String]) -> LoaderResult<Option<Proxy>> {
    let proxies = urls
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| {
            Url::parse(value).map_err(|source| LoaderError::InvalidUrl {
                field: "http_loader_proxy_urls",
                value: value.to_string(),
                source,
            })
        })
        .collect::<LoaderResult<Vec<_>>>()?;
    if proxies.is_empty() {
        return Ok(None);
    }
    let matcher = SourceMatcher::new("http_loader_proxy_allowed_sources", allowed_sources, &[])?;
    let matcher = (!matcher.is_empty()).then_some(matcher);
    let next = AtomicUsize::new(0);
    Ok(Some(Proxy::custom(move |url: &Url| {
        if matcher.as_ref().is_some_and(|matcher| !matcher.matches(url)) {
            return None;
        }
        let index = next.fetch_add(1, Ordering::Relaxed) % proxies.len();
        proxies.get(index).cloned()
    })))
}

fn map_transport_error(image: &str, err: &reqwest::Error) -> ImageError {
    if is_blocked_error(err) {
        ImageError::unauthorized("destination_blocked", image)
    } else if err.is_timeout() {
        ImageError::Timeout { stage: "load" }
    } else {
        ImageError::backend("http.fetch", err.to_string())
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

#[async_trait]
impl Loader for HttpLoader {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, ctx: &RequestContext, image: &str) -> ImageResult<Blob> {
        let url = self.source_url(image)?;
        let response = self
            .client
            .get(url.clone())
            .headers(self.request_headers(ctx))
            .send()
            .await
            .map_err(|err| map_transport_error(image, &err))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ImageError::not_found(image));
        }
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "upstream source failed");
            return Err(ImageError::Upstream {
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        if !self.accepts(header("content-type")) {
            return Err(ImageError::unsupported(
                "content_type",
                header("content-type").unwrap_or_default(),
            ));
        }
        if response
            .content_length()
            .is_some_and(|length| self.too_large(length))
        {
            return Err(ImageError::invalid("max_size_exceeded", image));
        }

        let mut response = response;
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| map_transport_error(image, &err))?
        {
            body.extend_from_slice(&chunk);
            if self.too_large(body.len() as u64) {
                return Err(ImageError::invalid("max_size_exceeded", image));
            }
        }

        let carried = self
            .override_response_headers
            .iter()
            .filter_map(|name| header(name).map(|value| (name.clone(), value.to_string())))
            .collect();
        let stat = Stat {
            modified: header("last-modified").and_then(parse_http_date),
            etag: header("etag").map(ToString::to_string),
            size: body.len() as u64,
        };
        debug!(url = %url, size = stat.size, "loaded remote image");
        Ok(Blob::from_bytes(body).with_stat(stat).with_headers(carried))
    }

    fn path(&self, image: &str) -> Option<String> {
        self.source_url(image).ok().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use prism_core::ErrorKind;
    use std::error::Error;

    fn loader(config: HttpLoaderConfig) -> Result<HttpLoader, Box<dyn Error>> {
        Ok(HttpLoader::new(config)?)
    }

    fn base(server: &MockServer) -> HttpLoaderConfig {
        HttpLoaderConfig {
            base_url: Some(server.base_url()),
            ..HttpLoaderConfig::default()
        }
    }

    #[tokio::test]
    async fn loads_body_metadata_and_carried_headers() -> Result<(), Box<dyn Error>> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/images/gopher.png")
                .header("user-agent-extra", "kept");
            then.status(200)
                .header("content-type", "image/png")
                .header("etag", "\"abc\"")
                .header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .header("cache-control", "max-age=60")
                .body("png-bytes");
        });

        let loader = loader(HttpLoaderConfig {
            forward_headers: vec!["User-Agent-Extra".into()],
            override_response_headers: vec!["Cache-Control".into()],
            ..base(&server)
        })?;
        let ctx = RequestContext::background().with_headers(vec![
            ("User-Agent-Extra".into(), "kept".into()),
            ("Cookie".into(), "dropped".into()),
        ]);
        let blob = loader.get(&ctx, "images/gopher.png").await?;
        mock.assert();
        assert_eq!(&*blob.read_all().await?, b"png-bytes");
        let stat = blob.stat().cloned().unwrap_or_default();
        assert_eq!(stat.etag.as_deref(), Some("\"abc\""));
        assert_eq!(stat.size, 9);
        assert!(stat.modified.is_some());
        assert_eq!(
            blob.headers(),
            &[("cache-control".to_string(), "max-age=60".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn status_codes_map_onto_the_taxonomy() -> Result<(), Box<dyn Error>> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/missing.png");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/broken.png");
            then.status(500);
        });
        let loader = loader(base(&server))?;
        let ctx = RequestContext::background();

        let missing = loader.get(&ctx, "missing.png").await.err();
        assert_eq!(missing.map(|err| err.kind()), Some(ErrorKind::NotFound));
        let broken = loader.get(&ctx, "broken.png").await.err();
        assert!(matches!(broken, Some(ImageError::Upstream { status: 500 })));
        Ok(())
    }

    #[tokio::test]
    async fn size_cap_and_accept_filter() -> Result<(), Box<dyn Error>> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/big.png");
            then.status(200)
                .header("content-type", "image/png")
                .body(vec![0_u8; 64]);
        });
        server.mock(|when, then| {
            when.method(GET).path("/page.html");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body("<html/>");
        });
        let loader = loader(HttpLoaderConfig {
            max_allowed_size: 16,
            accept: "image/*".into(),
            ..base(&server)
        })?;
        let ctx = RequestContext::background();

        let big = loader.get(&ctx, "big.png").await.err();
        assert_eq!(big.map(|err| err.kind()), Some(ErrorKind::Invalid));
        let page = loader.get(&ctx, "page.html").await.err();
        assert_eq!(page.map(|err| err.kind()), Some(ErrorKind::Unsupported));
        Ok(())
    }

    #[tokio::test]
    async fn allow_list_rejects_other_hosts() -> Result<(), Box<dyn Error>> {
        let loader = loader(HttpLoaderConfig {
            allowed_sources: vec!["*.example.com".into()],
            ..HttpLoaderConfig::default()
        })?;
        let ctx = RequestContext::background();
        let denied = loader.get(&ctx, "evil.test/a.png").await.err();
        assert_eq!(denied.map(|err| err.kind()), Some(ErrorKind::Unauthorized));
        assert_eq!(
            loader.path("img.example.com/a.png").as_deref(),
            Some("https://img.example.com/a.png")
        );
        assert!(loader.path("evil.test/a.png").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn blocked_networks_reject_literal_and_resolved_hosts() -> Result<(), Box<dyn Error>> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/a.png");
            then.status(200).header("content-type", "image/png").body("x");
        });
        let policy = NetworkPolicy {
            block_loopback: true,
            ..NetworkPolicy::default()
        };
        let loader = loader(HttpLoaderConfig {
            default_scheme: "http".into(),
            network_policy: policy,
            ..HttpLoaderConfig::default()
        })?;
        let ctx = RequestContext::background();

        let literal = loader
            .get(&ctx, &format!("127.0.0.1:{}/a.png", server.port()))
            .await
            .err();
        assert_eq!(literal.map(|err| err.kind()), Some(ErrorKind::Unauthorized));
        let resolved = loader
            .get(&ctx, &format!("localhost:{}/a.png", server.port()))
            .await
            .err();
        assert_eq!(resolved.map(|err| err.kind()), Some(ErrorKind::Unauthorized));
        Ok(())
    }

    #[test]
    fn scheme_handling() -> Result<(), Box<dyn Error>> {
        let default = loader(HttpLoaderConfig::default())?;
        assert_eq!(
            default.path("raw.githubusercontent.com/a.png").as_deref(),
            Some("https://raw.githubusercontent.com/a.png")
        );
        assert_eq!(
            default.path("http://host.test/a.png").as_deref(),
            Some("http://host.test/a.png")
        );
        let no_scheme = loader(HttpLoaderConfig {
            default_scheme: "nil".into(),
            ..HttpLoaderConfig::default()
        })?;
        assert!(no_scheme.path("host.test/a.png").is_none());
        assert!(
            HttpLoader::new(HttpLoaderConfig {
                base_url: Some("::nope".into()),
                ..HttpLoaderConfig::default()
            })
            .is_err()
        );
        Ok(())
    }

    #[test]
    fn proxies_rotate_and_respect_their_allow_list() -> Result<(), Box<dyn Error>> {
        let proxy = rotating_proxy(
            &["http://proxy-a:8080".into(), "http://proxy-b:8080".into()],
            &["*.proxied.test".into()],
        )?;
        assert!(proxy.is_some());
        assert!(rotating_proxy(&[], &[])?.is_none());
        assert!(rotating_proxy(&["::bad".into()], &[]).is_err());
        Ok(())
    }
}
