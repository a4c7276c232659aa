//! The image endpoint.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, LAST_MODIFIED},
    },
    response::{IntoResponse, Response},
};
use prism_core::{Blob, ImageError, RequestContext};
use tracing::{debug, warn};

use crate::http::caching::{cache_control, etag, last_modified, not_modified};
use crate::http::errors::ApiError;
use crate::state::ApiState;

/// Serve a signed or `unsafe` image path through the engine.
pub(crate) async fn serve_image(
    State(state): State<Arc<ApiState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(path) = state.strip_prefix(uri.path()) else {
        return ApiError::not_found("path outside the configured prefix").into_response();
    };
    let ctx = request_context(&state, &headers);
    match state.engine.serve(&ctx, path).await {
        Ok(blob) => match respond(&state, &headers, &blob).await {
            Ok(response) => response,
            Err(err) => failure(path, &err),
        },
        Err(err) => failure(path, &err),
    }
}

fn request_context(state: &ApiState, headers: &HeaderMap) -> RequestContext {
    let ctx = RequestContext::background();
    if !state.forward_headers {
        return ctx;
    }
    let forwarded = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    ctx.with_headers(forwarded)
}

async fn respond(
    state: &ApiState,
    headers: &HeaderMap,
    blob: &Blob,
) -> Result<Response, ImageError> {
    let mut validators = HeaderMap::new();
    validators.insert(CACHE_CONTROL, cache_control(&state.server.cache));
    let tag = blob.stat().and_then(etag);
    if let Some(value) = tag.as_deref().and_then(|tag| HeaderValue::from_str(tag).ok()) {
        validators.insert(ETAG, value);
    }
    if let Some(value) = blob
        .stat()
        .and_then(last_modified)
        .and_then(|date| HeaderValue::from_str(&date).ok())
    {
        validators.insert(LAST_MODIFIED, value);
    }
    if tag.as_deref().is_some_and(|tag| not_modified(headers, tag)) {
        return Ok((StatusCode::NOT_MODIFIED, validators).into_response());
    }

    let content_type = blob.content_type().await?;
    let bytes = blob.read_all().await?;
    let mut response = Response::new(Body::from(bytes.to_vec()));
    let response_headers = response.headers_mut();
    response_headers.extend(validators);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response_headers.insert(CONTENT_TYPE, value);
    }
    // Captured upstream headers win over the computed ones.
    for (name, value) in blob.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response_headers.insert(name, value);
        }
    }
    Ok(response)
}

fn failure(path: &str, err: &ImageError) -> Response {
    let response = ApiError::from(err);
    if response.status.is_server_error() {
        warn!(path = %path, kind = %err.kind(), error = %err, "image request failed");
    } else {
        debug!(path = %path, kind = %err.kind(), error = %err, "image request rejected");
    }
    response.into_response()
}
