#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Core domain types for the Prism image proxy.
//!
//! Layout: `blob.rs` (content plus metadata), `error.rs` (error taxonomy),
//! `params.rs` (parsed request intent), `context.rs` (deadlines and
//! cancellation), `capability.rs` (loader/storage/processor traits).

pub mod blob;
pub mod capability;
pub mod context;
pub mod error;
pub mod params;

pub use blob::{Blob, BlobReader, BlobType, Stat};
pub use capability::{Loader, Processor, ResultStorage, Storage};
pub use context::RequestContext;
pub use error::{ErrorKind, ImageError, ImageResult};
pub use params::{Crop, Filter, HAlign, Params, TrimPosition, VAlign};
