//! Permissive Field Extraction
//!
//! The upstream feed is inconsistent about encoding: the same numeric field
//! arrives as a JSON number on one message and as a numeric string on the
//! next. Every numeric field goes through the same rule:
//!
//! - JSON number → its value
//! - JSON string holding a finite number → the parsed value
//! - anything else (absent, null, unparseable) → the caller's default

use serde_json::Value;

/// Coerce a JSON value into an `f64`.
#[must_use]
pub fn coerce_f64(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(default),
        _ => default,
    }
}

/// Coerce a JSON value into an `i64`.
///
/// Fractional input is truncated toward zero.
#[must_use]
pub fn coerce_i64(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(float_to_i64)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
    .unwrap_or(default)
}

/// Coerce a JSON value into a `bool`.
///
/// Accepts booleans, `"true"`/`"false"` strings and `0`/`1` numbers.
#[must_use]
pub fn coerce_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        Some(Value::Number(n)) => n.as_f64().map_or(default, |v| v != 0.0),
        _ => default,
    }
}

/// Read a string field, defaulting to empty.
///
/// Numbers are rendered with their JSON representation so identifiers sent
/// as numbers are not lost.
#[must_use]
pub fn string_field(message: &Value, key: &str) -> String {
    match message.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Read a numeric field as `f64`, defaulting to `0.0`.
#[must_use]
pub fn f64_field(message: &Value, key: &str) -> f64 {
    coerce_f64(message.get(key), 0.0)
}

/// Read a numeric field as `i64`, defaulting to `0`.
#[must_use]
pub fn i64_field(message: &Value, key: &str) -> i64 {
    coerce_i64(message.get(key), 0)
}

/// Read a boolean field, defaulting to `false`.
#[must_use]
pub fn bool_field(message: &Value, key: &str) -> bool {
    coerce_bool(message.get(key), false)
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_i64(v: f64) -> Option<i64> {
    #[allow(clippy::cast_precision_loss)]
    let in_range = v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64;
    in_range.then(|| v.trunc() as i64)
}
