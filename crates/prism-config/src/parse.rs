//! Value parsers shared by the settings builder.

use std::time::Duration;

use ipnet::IpNet;

use crate::error::{ConfigError, ConfigResult};

/// Parse `500ms`, `30s`, `5m`, `1h`; a bare number is seconds.
pub(crate) fn duration(field: &'static str, value: &str) -> ConfigResult<Duration> {
    let value = value.trim();
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| ConfigError::invalid(field, "expected a duration such as 30s", value))?;
    let parsed = match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3_600).map(Duration::from_secs),
        _ => None,
    };
    parsed.ok_or_else(|| ConfigError::invalid(field, "expected a duration such as 30s", value))
}

/// Like [`duration`], with zero meaning "no deadline".
pub(crate) fn timeout(field: &'static str, value: &str) -> ConfigResult<Option<Duration>> {
    duration(field, value).map(|parsed| Some(parsed).filter(|parsed| !parsed.is_zero()))
}

/// Optional expiration; absent, blank, or zero disables it.
pub(crate) fn expiration(
    field: &'static str,
    value: Option<&str>,
) -> ConfigResult<Option<Duration>> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => timeout(field, value),
        None => Ok(None),
    }
}

/// Comma separated list with blank entries dropped.
pub(crate) fn csv(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma separated CIDR networks.
pub(crate) fn networks(field: &'static str, value: Option<&str>) -> ConfigResult<Vec<IpNet>> {
    csv(value)
        .iter()
        .map(|item| {
            item.parse::<IpNet>()
                .map_err(|_| ConfigError::invalid(field, "expected CIDR notation", item))
        })
        .collect()
}

/// Normalise to a leading and trailing `/`; `foo` becomes `/foo/`.
pub(crate) fn dir(value: &str) -> String {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Octal permission such as `0755`.
pub(crate) fn mode(field: &'static str, value: &str) -> ConfigResult<u32> {
    let value = value.trim();
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| ConfigError::invalid(field, "expected an octal permission", value))
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
