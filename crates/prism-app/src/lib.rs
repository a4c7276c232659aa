#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Prism application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (component assembly and serve loop), `error.rs`
//! (application errors).

/// Component assembly and process lifecycle.
pub mod bootstrap;
/// Application-level errors.
pub mod error;

pub use bootstrap::{assemble, run_app, run_app_with};
pub use error::{AppError, AppResult};
