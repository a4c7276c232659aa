#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Storage backends for Prism.
//!
//! Layout: `resolver.rs` (logical path to backend key), `file.rs`
//! (filesystem storage), `object.rs` (bucket storage over an
//! [`ObjectClient`]), `error.rs` (construction errors).

pub mod error;
pub mod file;
pub mod object;
pub mod resolver;

pub use error::{StorageError, StorageResult};
pub use file::{FileStorage, FileStorageConfig};
pub use object::{
    MemoryObjectClient, ObjectClient, ObjectMeta, ObjectStorage, ObjectStorageConfig, PutOptions,
    StorageClass,
};
pub use resolver::{KeyResolver, Resolved, SafeChars, resolve};
