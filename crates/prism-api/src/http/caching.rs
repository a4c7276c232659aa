//! Response validators and `Cache-Control`.
//!
//! # Design
//! - Successful responses get `public` caching from the TTL/SWR settings.
//!   A zero TTL or the `no-cache` switch turns every response private.
//! - `ETag` comes from the blob's stat; without one a weak tag is derived
//!   from size and modification time.
//! - `If-None-Match` is honoured with a bodyless `304`.

use axum::http::{HeaderMap, HeaderValue, header::IF_NONE_MATCH};
use prism_config::CacheHeaders;
use prism_core::Stat;

use crate::http::constants::NO_CACHE;

/// `Cache-Control` value for a successful response.
pub(crate) fn cache_control(policy: &CacheHeaders) -> HeaderValue {
    let ttl = policy.ttl.as_secs();
    if policy.no_cache || ttl == 0 {
        return HeaderValue::from_static(NO_CACHE);
    }
    let swr = policy.swr.as_secs();
    let value = if swr > 0 && swr < ttl {
        format!(
            "public, s-maxage={ttl}, max-age={ttl}, no-transform, stale-while-revalidate={swr}"
        )
    } else {
        format!("public, s-maxage={ttl}, max-age={ttl}, no-transform")
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(NO_CACHE))
}

/// Entity tag for `stat`, quoted.
pub(crate) fn etag(stat: &Stat) -> Option<String> {
    if let Some(tag) = stat.etag.as_deref().map(str::trim).filter(|tag| !tag.is_empty()) {
        return Some(if tag.starts_with('"') || tag.starts_with("W/") {
            tag.to_string()
        } else {
            format!("\"{tag}\"")
        });
    }
    stat.modified
        .map(|modified| format!("W/\"{:x}-{:x}\"", stat.size, modified.timestamp()))
}

/// IMF-fixdate for `Last-Modified`.
pub(crate) fn last_modified(stat: &Stat) -> Option<String> {
    stat.modified
        .map(|modified| modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Whether the request's `If-None-Match` matches `etag`.
pub(crate) fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
    let bare = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let expected = bare(etag);
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim() == "*" || bare(candidate) == expected)
}
