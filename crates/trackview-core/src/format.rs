//! Display formatting shared by the run and experiment pages.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

static EXTENSION: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(.*[^/])\.[^/.]+$").ok());

/// Shown in place of a timestamp the run never recorded.
pub const UNKNOWN_TIMESTAMP: &str = "(unknown)";

/// Format a metric value with precision scaled to its magnitude.
///
/// Zero is `"0"`; magnitudes below `1e-3` use exponent notation with three
/// fraction digits; otherwise the value is rounded to 3, 2 or 1 decimals for
/// magnitudes below 10, below 100 and above. Halves round toward positive
/// infinity, so `-12.125` is `"-12.12"`.
#[must_use]
pub fn format_metric(value: f64) -> String {
    let magnitude = value.abs();
    if value == 0.0 {
        "0".to_string()
    } else if magnitude < 1e-3 {
        format!("{value:.3e}")
    } else if magnitude < 10.0 {
        round_to(value, 1000.0).to_string()
    } else if magnitude < 100.0 {
        round_to(value, 100.0).to_string()
    } else {
        round_to(value, 10.0).to_string()
    }
}

fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale + 0.5).floor() / scale
}

/// Cut `text` to `max_len` characters, ending in `...`, when it is longer.
#[must_use]
pub fn truncate_string(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Human-readable duration from milliseconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_duration(duration_ms: i64) -> String {
    const SECOND: f64 = 1000.0;
    const MINUTE: f64 = SECOND * 60.0;
    const HOUR: f64 = MINUTE * 60.0;
    const DAY: f64 = HOUR * 24.0;

    if duration_ms < 500 {
        return format!("{duration_ms}ms");
    }
    let duration = duration_ms as f64;
    if duration < MINUTE {
        format!("{:.1}s", duration / SECOND)
    } else if duration < HOUR {
        format!("{:.1}min", duration / MINUTE)
    } else if duration < DAY {
        format!("{:.1}h", duration / HOUR)
    } else {
        format!("{:.1}d", duration / DAY)
    }
}

/// Last `/`-separated segment of a path.
#[must_use]
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Path without its final extension. Dot files and directories are left alone.
#[must_use]
pub fn drop_extension(path: &str) -> String {
    match EXTENSION.as_ref() {
        Some(extension) => extension.replace(path, "$1").into_owned(),
        None => path.to_string(),
    }
}

/// `yyyy-mm-dd HH:MM:ss` in UTC for an epoch-milliseconds timestamp.
#[must_use]
pub fn format_timestamp(timestamp_ms: Option<i64>) -> String {
    let Some(timestamp_ms) = timestamp_ms else {
        return UNKNOWN_TIMESTAMP.to_string();
    };
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .ok()
        .and_then(|moment| {
            moment
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
                .ok()
        })
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string())
}

#[must_use]
pub fn pluralize(word: &str, quantity: usize) -> String {
    if quantity > 1 {
        format!("{word}s")
    } else {
        word.to_string()
    }
}

/// A run/metric pair identifying one plotted curve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurveInfo {
    pub run_id: String,
    pub metric_name: String,
}

#[must_use]
pub fn curve_key(run_id: &str, metric_name: &str) -> String {
    format!("{run_id}-{metric_name}")
}

/// Inverse of [`curve_key`]. Run ids never contain `-`, so the key splits at
/// the first one; metric names keep any later dashes.
#[must_use]
pub fn curve_info_from_key(key: &str) -> CurveInfo {
    let (run_id, metric_name) = key.split_once('-').unwrap_or((key, ""));
    CurveInfo {
        run_id: run_id.to_string(),
        metric_name: metric_name.to_string(),
    }
}

/// Experiment id order: integer ids ascending, then every other id lexically.
#[must_use]
pub fn compare_experiments(lhs: &str, rhs: &str) -> Ordering {
    match (leading_integer(lhs), leading_integer(rhs)) {
        (Some(lhs_id), Some(rhs_id)) => lhs_id.cmp(&rhs_id),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => lhs.cmp(rhs),
    }
}

// Leading decimal integer, ignoring leading whitespace and trailing garbage.
pub(crate) fn leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|value| sign * value)
}

/// One recorded value of a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

#[must_use]
pub fn compare_by_step_and_timestamp(lhs: &MetricPoint, rhs: &MetricPoint) -> Ordering {
    lhs.step.cmp(&rhs.step).then_with(|| lhs.timestamp.cmp(&rhs.timestamp))
}
