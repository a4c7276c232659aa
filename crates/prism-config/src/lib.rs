#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Configuration surface for Prism.
//!
//! Layout: `cli.rs` (flags and their `PRISM_*` environment variables),
//! `settings.rs` (validated, typed settings), `parse.rs` (durations, lists,
//! directories, networks), `error.rs` (validation errors).

pub mod cli;
pub mod error;
mod parse;
pub mod settings;

pub use cli::Cli;
pub use error::{ConfigError, ConfigResult};
pub use settings::{
    Backends, CacheHeaders, LoggingSettings, SecuritySettings, ServerSettings, Settings,
};
