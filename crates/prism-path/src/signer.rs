//! HMAC request signatures.
//!
//! Tokens are the URL-safe, padded base64 encoding of an HMAC over the
//! canonical path, optionally truncated to a fixed number of characters.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

/// Digest used for the HMAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerAlgorithm {
    /// HMAC-SHA1, 28-character tokens.
    #[default]
    Sha1,
    /// HMAC-SHA256, 44-character tokens.
    Sha256,
    /// HMAC-SHA512, 88-character tokens.
    Sha512,
}

impl SignerAlgorithm {
    /// Parse a configuration token such as `sha256`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// Keyed signer shared by the codec and URL generators.
#[derive(Clone)]
pub struct Signer {
    algorithm: SignerAlgorithm,
    secret: Arc<[u8]>,
    truncate: usize,
}

impl Debug for Signer {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Signer")
            .field("algorithm", &self.algorithm)
            .field("secret", &"<redacted>")
            .field("truncate", &self.truncate)
            .finish()
    }
}

impl Signer {
    /// Build a signer; `truncate == 0` keeps the full token.
    #[must_use]
    pub fn new(algorithm: SignerAlgorithm, secret: impl AsRef<[u8]>, truncate: usize) -> Self {
        Self {
            algorithm,
            secret: Arc::from(secret.as_ref()),
            truncate,
        }
    }

    /// HMAC-SHA1 signer without truncation.
    #[must_use]
    pub fn sha1(secret: impl AsRef<[u8]>) -> Self {
        Self::new(SignerAlgorithm::Sha1, secret, 0)
    }

    /// Configured digest.
    #[must_use]
    pub const fn algorithm(&self) -> SignerAlgorithm {
        self.algorithm
    }

    /// Token for `payload`.
    #[must_use]
    pub fn sign(&self, payload: &str) -> String {
        let digest = match self.algorithm {
            SignerAlgorithm::Sha1 => mac::<Hmac<Sha1>>(&self.secret, payload.as_bytes()),
            SignerAlgorithm::Sha256 => mac::<Hmac<Sha256>>(&self.secret, payload.as_bytes()),
            SignerAlgorithm::Sha512 => mac::<Hmac<Sha512>>(&self.secret, payload.as_bytes()),
        };
        let mut token = URL_SAFE.encode(digest);
        if self.truncate > 0 && token.len() > self.truncate {
            token.truncate(self.truncate);
        }
        token
    }

    /// Constant-time comparison of `token` against the signature of `payload`.
    #[must_use]
    pub fn verify(&self, payload: &str, token: &str) -> bool {
        self.sign(payload).as_bytes().ct_eq(token.as_bytes()).into()
    }
}

fn mac<M: Mac + KeyInit>(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    <M as KeyInit>::new_from_slice(secret).map_or_else(
        |_| Vec::new(),
        |mac| mac.chain_update(payload).finalize().into_bytes().to_vec(),
    )
}
