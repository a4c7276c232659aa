#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::pedantic, clippy::nursery)]

//! Shared test doubles used across integration suites.
//! Layout: memory.rs (in-memory loader and storage), processors.rs
//! (counting and scripted processors), failing.rs (storage whose writes fail).

pub mod failing;
pub mod memory;
pub mod processors;

pub use failing::FailingStorage;
pub use memory::{MemoryLoader, MemoryStorage};
pub use processors::CountingProcessor;
