//! Storage and result key derivation.
//!
//! The result key doubles as the single-flight key, so two requests share
//! work exactly when they would share a cached result.

use prism_core::Params;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::codec::serialize_canonical;

const SUFFIX_DIGEST_LEN: usize = 20;

/// Layout of originals persisted to storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePathStyle {
    /// Store under the image path as requested.
    #[default]
    Original,
    /// Store under a sharded SHA-1 digest of the image path.
    Digest,
}

impl StoragePathStyle {
    /// Parse a configuration token.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" => Some(Self::Original),
            "digest" => Some(Self::Digest),
            _ => None,
        }
    }

    /// Storage key for `image`.
    #[must_use]
    pub fn hash(self, image: &str) -> String {
        match self {
            Self::Original => image.to_string(),
            Self::Digest => sharded_digest(image),
        }
    }
}

/// Layout of processed results persisted to result storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultPathStyle {
    /// Store under the canonical request path.
    #[default]
    Original,
    /// Store under a sharded SHA-1 digest of the canonical request path.
    Digest,
    /// Image path with a digest suffix before the extension.
    Suffix,
    /// Like `Suffix`, plus the requested dimensions.
    Size,
}

impl ResultPathStyle {
    /// Parse a configuration token.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" => Some(Self::Original),
            "digest" => Some(Self::Digest),
            "suffix" => Some(Self::Suffix),
            "size" => Some(Self::Size),
            _ => None,
        }
    }

    /// Result key for `params`.
    #[must_use]
    pub fn hash(self, params: &Params) -> String {
        let canonical = serialize_canonical(params);
        match self {
            Self::Original => canonical,
            Self::Digest => sharded_digest(&canonical),
            Self::Suffix | Self::Size => {
                let digest = hex_digest(&canonical);
                let (stem, extension) = split_extension(&params.image);
                let extension = output_extension(params).unwrap_or_else(|| extension.to_string());
                let short = &digest[..SUFFIX_DIGEST_LEN];
                if self == Self::Size {
                    format!(
                        "{stem}.{short}_{}x{}{extension}",
                        params.width, params.height
                    )
                } else {
                    format!("{stem}.{short}{extension}")
                }
            }
        }
    }
}

fn hex_digest(value: &str) -> String {
    format!("{:x}", Sha1::digest(value.as_bytes()))
}

fn sharded_digest(value: &str) -> String {
    let digest = hex_digest(value);
    format!("{}/{}", &digest[..2], &digest[2..])
}

fn split_extension(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map_or(0, |index| index + 1);
    match image[name_start..].rfind('.') {
        Some(dot) if dot > 0 => image.split_at(name_start + dot),
        _ => (image, ""),
    }
}

fn output_extension(params: &Params) -> Option<String> {
    if params.meta {
        return Some(".json".to_string());
    }
    params
        .filter("format")
        .and_then(|filter| filter.arg(0))
        .map(|format| format!(".{}", format.to_ascii_lowercase()))
}
