//! Lenient Field Coercion
//!
//! Upstream producers are loosely typed: numbers arrive as strings, integers
//! as floats, timestamps in seconds or milliseconds. Every helper here
//! returns `None` instead of failing so one malformed field never drops an
//! otherwise useful event.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Values at or above this are millisecond timestamps.
pub const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// Coerce a JSON value to `f64`. Accepts numbers and numeric strings.
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Coerce a JSON value to `u64`, truncating fractional values.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn as_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let float = as_f64(value)?;
    (float >= 0.0).then_some(float as u64)
}

/// Coerce a JSON value to `i64`, truncating fractional values.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn as_i64(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    as_f64(value).map(|f| f as i64)
}

/// Coerce a JSON value to a non-empty string. Numbers are formatted.
#[must_use]
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a free-form detail field. Structured values are kept as JSON text.
#[must_use]
pub fn as_detail(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Interpret a value as a seconds timestamp.
///
/// Non-positive and unparseable values yield `None`; values at or above
/// [`MILLIS_THRESHOLD`] are divided by 1000.
#[must_use]
pub fn as_timestamp(value: &Value) -> Option<f64> {
    let ts = as_f64(value)?;
    if ts <= 0.0 {
        return None;
    }
    if ts >= MILLIS_THRESHOLD {
        Some(ts / 1000.0)
    } else {
        Some(ts)
    }
}

/// Interpret a value as a truthy flag (`true`, non-zero, `"true"`, `"1"`).
#[must_use]
pub fn as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// Look up a string field.
#[must_use]
pub fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(as_string)
}

/// Look up a string field, lower-cased.
#[must_use]
pub fn lower_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    str_field(map, key).map(|s| s.to_lowercase())
}

/// First of `keys` holding a non-zero number, with the key that supplied it.
#[must_use]
pub fn first_nonzero<'a>(map: &Map<String, Value>, keys: &[&'a str]) -> Option<(f64, &'a str)> {
    keys.iter().find_map(|key| {
        map.get(*key)
            .and_then(as_f64)
            .filter(|v| *v != 0.0)
            .map(|v| (v, *key))
    })
}

/// First of `keys` holding a usable timestamp.
#[must_use]
pub fn first_timestamp(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(as_timestamp))
}

/// Current wall-clock time in fractional seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Format a seconds timestamp as RFC 3339 in UTC.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn isoformat(ts: f64) -> String {
    let micros = (ts * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case(json!(1.5), Some(1.5); "float")]
    #[test_case(json!(42), Some(42.0); "integer")]
    #[test_case(json!(" 7.25 "), Some(7.25); "padded string")]
    #[test_case(json!("abc"), None; "garbage string")]
    #[test_case(json!(null), None; "null")]
    #[test_case(json!([1]), None; "array")]
    fn coerce_f64(input: Value, expected: Option<f64>) {
        assert_eq!(as_f64(&input), expected);
    }

    #[test_case(json!(1000), Some(1000.0); "seconds")]
    #[test_case(json!(1_700_000_000_123_u64), Some(1_700_000_000.123); "millis")]
    #[test_case(json!("1700000000"), Some(1_700_000_000.0); "string seconds")]
    #[test_case(json!(0), None; "zero")]
    #[test_case(json!(-5), None; "negative")]
    #[test_case(json!("soon"), None; "unparseable")]
    fn coerce_timestamp(input: Value, expected: Option<f64>) {
        let got = as_timestamp(&input);
        match (got, expected) {
            (Some(g), Some(e)) => assert!((g - e).abs() < 1e-6, "{g} != {e}"),
            (g, e) => assert_eq!(g, e),
        }
    }

    #[test_case(json!(12), Some(12); "integer")]
    #[test_case(json!(12.9), Some(12); "truncates")]
    #[test_case(json!("15"), Some(15); "string")]
    #[test_case(json!(-1), None; "negative")]
    fn coerce_u64(input: Value, expected: Option<u64>) {
        assert_eq!(as_u64(&input), expected);
    }

    #[test]
    fn first_nonzero_skips_zero_values() {
        let map = json!({"bps_avg": 0, "avg_bps": "250"});
        let map = map.as_object().unwrap();
        assert_eq!(
            first_nonzero(map, &["bps_avg", "avg_bps", "avg"]),
            Some((250.0, "avg_bps"))
        );
    }

    #[test]
    fn detail_keeps_structured_values() {
        assert_eq!(as_detail(&json!("gap")), Some("gap".to_string()));
        assert_eq!(as_detail(&json!({"n": 1})), Some(r#"{"n":1}"#.to_string()));
        assert_eq!(as_detail(&json!("")), None);
    }

    #[test]
    fn isoformat_is_utc() {
        assert_eq!(isoformat(0.0), "1970-01-01T00:00:00+00:00");
        assert_eq!(isoformat(1000.5), "1970-01-01T00:16:40.500+00:00");
    }
}
