//! Parsing of `--since` / `--to` values and duration settings
//!
//! Durations use an extended Go syntax: one or more `<number><unit>` segments
//! with an optional leading sign, e.g. `10m`, `1h30m`, `1.5d`, `-5m`.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::config::ConfigError;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)([a-zµμ]+)").expect("valid segment regex"));

static WHOLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(?:[\d.]+[a-zµμ]+)+$").expect("valid duration regex"));

/// Nanoseconds per unit
fn unit_nanos(unit: &str) -> Option<f64> {
    let nanos = match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3_600.0 * 1e9,
        "d" => 86_400.0 * 1e9,
        "w" => 7.0 * 86_400.0 * 1e9,
        "mm" => 30.0 * 86_400.0 * 1e9,
        "y" => 365.0 * 86_400.0 * 1e9,
        _ => return None,
    };
    Some(nanos)
}

/// Parse a duration string into signed milliseconds
pub fn parse_duration_millis(input: &str) -> Result<i64, ConfigError> {
    let input = input.trim();
    if matches!(input, "0" | "+0" | "-0") {
        return Ok(0);
    }
    if !WHOLE.is_match(input) {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    let sign = if input.starts_with('-') { -1.0 } else { 1.0 };
    let mut total_nanos = 0.0;
    for caps in SEGMENT.captures_iter(input) {
        let value: f64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;
        let unit = unit_nanos(&caps[2]).ok_or_else(|| ConfigError::InvalidDuration(input.to_string()))?;
        total_nanos += value * unit;
    }

    Ok((sign * total_nanos / NANOS_PER_MILLI).round() as i64)
}

/// Parse a non-negative duration (poll interval, lookback)
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let millis = parse_duration_millis(input)?;
    if millis < 0 {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }
    Ok(Duration::from_millis(millis as u64))
}

/// Resolve a time spec to epoch milliseconds.
///
/// Accepts a duration (that long before `now_millis`), an RFC 3339 timestamp,
/// `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` in UTC, or integer epoch milliseconds.
pub fn parse_time_spec(input: &str, now_millis: i64) -> Result<i64, ConfigError> {
    let trimmed = input.trim();

    if let Ok(delta) = parse_duration_millis(trimmed) {
        return Ok(now_millis.saturating_sub(delta));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc).timestamp_millis());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc().timestamp_millis());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }

    if let Ok(epoch_millis) = trimmed.parse::<i64>() {
        return Ok(epoch_millis);
    }

    Err(ConfigError::InvalidTime(input.to_string()))
}
