#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs, unreachable_pub)]

//! Request path protocol for Prism.
//!
//! Layout: `codec.rs` (parse/serialize), `signer.rs` (HMAC signatures),
//! `hasher.rs` (storage and result key derivation).

pub mod codec;
pub mod hasher;
pub mod signer;

pub use codec::{PathCodec, parse, serialize, serialize_canonical};
pub use hasher::{ResultPathStyle, StoragePathStyle};
pub use signer::{Signer, SignerAlgorithm};
