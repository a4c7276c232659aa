#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Image transformation for Prism.
//!
//! Layout: `processor.rs` (the `Processor` implementation and its limits),
//! `pipeline.rs` (decode, geometry, filters, encode on a blocking thread),
//! `geometry.rs` (resize and crop arithmetic), `filters.rs` (filter
//! parsing), `color.rs` (colour arguments), `encode.rs` (output formats).

mod color;
mod encode;
mod filters;
mod geometry;
mod pipeline;
pub mod processor;

pub use encode::OutputFormat;
pub use processor::{ImageProcessor, ProcessorConfig};
