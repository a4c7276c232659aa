//! Engine tuning knobs.

use std::time::Duration;

use prism_path::{ResultPathStyle, StoragePathStyle};
use serde::Serialize;

/// When processed results are written to result storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Finish the write before answering.
    #[default]
    Sync,
    /// Answer immediately and write on a background task.
    Background,
}

impl WriteMode {
    /// Parse a configuration token.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "background" | "async" => Some(Self::Background),
            _ => None,
        }
    }
}

/// Timeouts, limits, and key layouts for [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    /// Deadline for a whole request, applied on top of the caller's context.
    pub request_timeout: Option<Duration>,
    /// Deadline for each loader or storage fetch.
    pub load_timeout: Option<Duration>,
    /// Deadline for each best-effort write.
    pub save_timeout: Option<Duration>,
    /// Deadline for each processor attempt.
    pub process_timeout: Option<Duration>,
    /// Maximum concurrent processing stages; `None` for unbounded.
    pub process_concurrency: Option<usize>,
    /// Extra attempts after a retryable processing failure.
    pub process_retry_limit: u32,
    /// When processed results are persisted.
    pub result_write_mode: WriteMode,
    /// Treat results older than their source as misses.
    pub modified_time_check: bool,
    /// Key layout for originals.
    pub storage_path_style: StoragePathStyle,
    /// Key layout for results; also the single-flight key.
    pub result_path_style: ResultPathStyle,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            load_timeout: Some(Duration::from_secs(20)),
            save_timeout: Some(Duration::from_secs(20)),
            process_timeout: Some(Duration::from_secs(20)),
            process_concurrency: None,
            process_retry_limit: 1,
            result_write_mode: WriteMode::Sync,
            modified_time_check: false,
            storage_path_style: StoragePathStyle::Original,
            result_path_style: ResultPathStyle::Original,
        }
    }
}
