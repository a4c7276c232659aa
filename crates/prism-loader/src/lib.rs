#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Remote source loading for Prism.
//!
//! Layout: `http.rs` (the reqwest-backed loader), `sources.rs` (host and
//! URL allow-lists), `policy.rs` (blocked networks and the guarded DNS
//! resolver), `error.rs` (construction errors).

pub mod error;
pub mod http;
pub mod policy;
pub mod sources;

pub use error::{LoaderError, LoaderResult};
pub use http::{HttpLoader, HttpLoaderConfig};
pub use policy::NetworkPolicy;
pub use sources::SourceMatcher;
