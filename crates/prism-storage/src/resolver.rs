//! Logical image path to backend key resolution.
//!
//! # Design
//! - Pure and deterministic: no I/O, identical inputs give identical keys.
//! - The requested path is normalised first (`.` and `..` collapsed, empty
//!   segments dropped), so the joined key can never leave the base directory.
//! - A bucket written as `name/sub/path` contributes `sub/path` to the base
//!   directory ahead of the configured one.
//! - Escaping leaves unreserved characters and `/` intact and percent-encodes
//!   the characters object stores treat specially, minus any configured safe
//!   characters. A safe-character value made of one character repeated twice
//!   (such as `--`) disables escaping entirely.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;

use crate::error::{StorageError, StorageResult};

const DEFAULT_ESCAPE: AsciiSet = CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Characters exempted from escaping.
#[derive(Debug, Clone)]
pub struct SafeChars {
    exempt: Option<Vec<u8>>,
}

impl Default for SafeChars {
    fn default() -> Self {
        Self::new("")
    }
}

impl SafeChars {
    /// Build from a configuration string such as `{}` or `--`.
    #[must_use]
    pub fn new(safe: &str) -> Self {
        let bytes = safe.as_bytes();
        if bytes.len() == 2 && bytes[0] == bytes[1] {
            return Self { exempt: None };
        }
        Self {
            exempt: Some(bytes.iter().copied().filter(u8::is_ascii).collect()),
        }
    }

    /// Whether escaping is disabled.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.exempt.is_none()
    }

    /// Escape `value` according to this set.
    #[must_use]
    pub fn escape(&self, value: &str) -> String {
        let Some(exempt) = &self.exempt else {
            return value.to_string();
        };
        let mut escaped = String::with_capacity(value.len());
        let mut start = 0;
        for (index, ch) in value.char_indices() {
            if ch.is_ascii() && exempt.contains(&(ch as u8)) {
                escaped.extend(utf8_percent_encode(&value[start..index], &DEFAULT_ESCAPE));
                escaped.push(ch);
                start = index + 1;
            }
        }
        escaped.extend(utf8_percent_encode(&value[start..], &DEFAULT_ESCAPE));
        escaped
    }
}

/// Resolution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Effective bucket name with any embedded sub-path removed.
    pub bucket: String,
    /// Escaped backend key.
    pub key: String,
}

/// Resolve `request_path` into a backend key.
///
/// Returns `None` when the path falls outside the configured scope.
#[must_use]
pub fn resolve(
    bucket: &str,
    base_dir: &str,
    path_prefix: &str,
    safe_chars: &str,
    request_path: &str,
) -> Option<Resolved> {
    let resolver = KeyResolver::new(bucket, base_dir, path_prefix, SafeChars::new(safe_chars));
    resolver.resolve(request_path).map(|key| Resolved {
        bucket: resolver.bucket().to_string(),
        key,
    })
}

/// Reusable resolver for one backend scope.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    bucket: String,
    base_dir: String,
    path_prefix: String,
    safe_chars: SafeChars,
    blacklist: Vec<Regex>,
}

impl KeyResolver {
    /// Build a resolver; `bucket` may embed a sub-path after the first `/`.
    #[must_use]
    pub fn new(bucket: &str, base_dir: &str, path_prefix: &str, safe_chars: SafeChars) -> Self {
        let (bucket, embedded) = bucket
            .split_once('/')
            .map_or((bucket, ""), |(name, sub)| (name, sub));
        let base_dir = normalize_dir(&format!("{embedded}/{base_dir}"));
        Self {
            bucket: bucket.to_string(),
            base_dir,
            path_prefix: normalize_dir(path_prefix),
            safe_chars,
            blacklist: Vec::new(),
        }
    }

    /// Reject normalised paths matching any of `patterns`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` when a pattern fails to compile.
    pub fn with_blacklist<I, S>(mut self, patterns: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|source| StorageError::InvalidPattern {
                field: "blacklist",
                pattern: pattern.to_string(),
                source,
            })?;
            self.blacklist.push(regex);
        }
        Ok(self)
    }

    /// Effective bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Effective base directory, always `/`-terminated.
    #[must_use]
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// Normalised path prefix, always `/`-terminated.
    #[must_use]
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Backend key for `request_path`, or `None` when out of scope.
    #[must_use]
    pub fn resolve(&self, request_path: &str) -> Option<String> {
        let cleaned = clean_path(request_path);
        if self.blacklist.iter().any(|regex| regex.is_match(&cleaned)) {
            return None;
        }
        let remainder = cleaned.strip_prefix(&self.path_prefix)?;
        if remainder.is_empty() {
            return None;
        }
        Some(self.safe_chars.escape(&format!("{}{remainder}", self.base_dir)))
    }
}

/// Rooted, `/`-terminated directory form: `foo` and `/foo/` become `/foo/`.
fn normalize_dir(dir: &str) -> String {
    let cleaned = clean_path(dir);
    if cleaned == "/" {
        cleaned
    } else {
        format!("{cleaned}/")
    }
}

/// Lexical normalisation of a rooted path.
fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
