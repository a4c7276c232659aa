//! Parsed params for a request path.

use std::sync::Arc;

use axum::{Json, extract::State, http::Uri};
use prism_core::Params;
use tracing::debug;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// Parse the path after `/params` without fetching anything.
pub(crate) async fn params(
    State(state): State<Arc<ApiState>>,
    uri: Uri,
) -> Result<Json<Params>, ApiError> {
    let path = state
        .strip_prefix(uri.path())
        .and_then(|path| path.strip_prefix("/params"))
        .ok_or_else(|| ApiError::not_found("path outside the configured prefix"))?;
    state.engine.codec().parse(path).map(Json).map_err(|err| {
        debug!(error = %err, "params request rejected");
        ApiError::from(&err)
    })
}
