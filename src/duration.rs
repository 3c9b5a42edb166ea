//! Duration parsing and formatting.
//!
//! Durations in rule and server files are accepted either as a number of
//! nanoseconds or as a string made of `<number><unit>` groups (`"100ms"`,
//! `"1m30s"`, `"1.5s"`). They are always written back as strings.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Error produced when a duration string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationParseError {
    input: String,
    reason: &'static str,
}

impl DurationParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Parse a duration string such as `"250ms"`, `"2s"` or `"1h2m3.5s"`.
///
/// A bare `"0"` is accepted as zero.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::new(input, "empty string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| DurationParseError::new(input, "missing unit"))?;
        if num_len == 0 {
            return Err(DurationParseError::new(input, "expected a number"));
        }
        let (number, tail) = rest.split_at(num_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| DurationParseError::new(input, "unknown unit"))?;

        let group = scale_number(number, scale).ok_or_else(|| DurationParseError::new(input, "bad number"))?;
        total = total
            .checked_add(group)
            .ok_or_else(|| DurationParseError::new(input, "overflow"))?;
        rest = next;
    }

    let nanos = u64::try_from(total).map_err(|_| DurationParseError::new(input, "overflow"))?;
    Ok(Duration::from_nanos(nanos))
}

/// Multiply a decimal literal by `scale` without going through floats.
fn scale_number(number: &str, scale: u128) -> Option<u128> {
    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(scale)?;

    let mut divisor: u128 = 1;
    let mut frac_value: u128 = 0;
    for digit in frac.chars() {
        let d = digit.to_digit(10)? as u128;
        // Digits past nanosecond precision cannot change the result.
        if divisor >= 1_000_000_000_000_000_000 {
            break;
        }
        frac_value = frac_value * 10 + d;
        divisor *= 10;
    }
    value = value.checked_add(frac_value * scale / divisor)?;
    Some(value)
}

/// Format a duration as a compact unit string (`"1m30s"`, `"100ms"`, `"0s"`).
///
/// The output always parses back to the same value with [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    let mut nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, scale) in [
        ("h", 3_600_000_000_000u128),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ] {
        let count = nanos / scale;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(unit);
            nanos %= scale;
        }
    }
    out
}

/// Serde adapter: `#[serde(with = "crate::duration::serde_format")]`.
pub mod serde_format {
    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(Duration::ZERO),
            serde_json::Value::Number(n) => {
                if let Some(nanos) = n.as_u64() {
                    Ok(Duration::from_nanos(nanos))
                } else if let Some(nanos) = n.as_f64().filter(|f| f.is_finite() && *f >= 0.0) {
                    Ok(Duration::from_nanos(nanos as u64))
                } else {
                    Err(D::Error::custom("duration must be a non-negative number of nanoseconds"))
                }
            }
            serde_json::Value::String(s) => parse_duration(&s).map_err(D::Error::custom),
            _ => Err(D::Error::custom("duration must be a number or a string")),
        }
    }
}
