//! Source allow-lists.
//!
//! Glob patterns without a `/` match the host alone (`*.example.com`);
//! patterns containing a `/` match `host/path` with `*` confined to one
//! segment. Regexes match the full URL. A URL is allowed when any entry
//! matches; an empty matcher allows nothing and is treated as "unset" by
//! callers.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use url::Url;

use crate::error::{LoaderError, LoaderResult};

/// Compiled host globs and URL regexes.
#[derive(Debug, Clone)]
pub struct SourceMatcher {
    hosts: GlobSet,
    paths: GlobSet,
    regexes: Vec<Regex>,
}

impl SourceMatcher {
    /// Compile `globs` and `regexes`, recording `field` on failure.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGlob` or `InvalidRegex` for patterns that fail to
    /// compile.
    pub fn new(field: &'static str, globs: &[String], regexes: &[String]) -> LoaderResult<Self> {
        let mut hosts = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();
        for pattern in globs.iter().map(|pattern| pattern.trim()) {
            if pattern.is_empty() {
                continue;
            }
            let glob_error = |source| LoaderError::InvalidGlob {
                field,
                pattern: pattern.to_string(),
                source,
            };
            if pattern.contains('/') {
                paths.add(
                    GlobBuilder::new(pattern)
                        .literal_separator(true)
                        .build()
                        .map_err(glob_error)?,
                );
            } else {
                hosts.add(
                    GlobBuilder::new(&pattern.to_ascii_lowercase())
                        .build()
                        .map_err(glob_error)?,
                );
            }
        }
        let set_error = |source| LoaderError::InvalidGlob {
            field,
            pattern: "<set>".to_string(),
            source,
        };
        let regexes = regexes
            .iter()
            .map(|pattern| pattern.trim())
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| LoaderError::InvalidRegex {
                    field,
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<LoaderResult<Vec<_>>>()?;
        Ok(Self {
            hosts: hosts.build().map_err(set_error)?,
            paths: paths.build().map_err(set_error)?,
            regexes,
        })
    }

    /// Whether no patterns were configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.paths.is_empty() && self.regexes.is_empty()
    }

    /// Whether `url` matches any configured pattern.
    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if self.hosts.is_match(&host) {
            return true;
        }
        if !self.paths.is_empty() && self.paths.is_match(format!("{host}{}", url.path())) {
            return true;
        }
        self.regexes.iter().any(|regex| regex.is_match(url.as_str()))
    }
}
