#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! HTTP transport for Prism.
//!
//! Layout: `http/router.rs` (routes, layers, listener), `http/image.rs` (the
//! image endpoint), `http/caching.rs` (validators and `Cache-Control`),
//! `http/errors.rs` (problem documents), `http/health.rs` (banner,
//! healthcheck, metrics), `http/params.rs` (parsed params), `http/telemetry.rs`
//! (request counters), `state.rs` (shared handler state), `error.rs`
//! (bootstrap errors).

pub mod error;
mod http;
mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
