#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Request orchestration for Prism.
//!
//! Layout: `engine.rs` (validate, cache lookup, load, process, persist),
//! `singleflight.rs` (per-key deduplication), `config.rs` (timeouts, limits,
//! key layouts).

pub mod config;
pub mod engine;
pub mod singleflight;

pub use config::{EngineConfig, WriteMode};
pub use engine::{Engine, EngineBuilder};
pub use singleflight::{Joined, SingleFlight};
