use crate::runner::HandlerError;
use model::query::Row;
use serde_json::Value;

/// Row lookup with case-insensitive fallback; SHOW commands return lowercase
/// keys while aggregation aliases come back uppercase.
pub(crate) fn get<'a>(row: &'a Row, key: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(key) {
        return Some(value);
    }
    row.iter()
        .find(|(row_key, _)| row_key.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

pub(crate) fn opt_str(row: &Row, key: &str) -> Option<String> {
    match get(row, key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

pub(crate) fn require_i64(row: &Row, key: &str) -> Result<i64, HandlerError> {
    match get(row, key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| HandlerError::Decode(format!("{key} is not an integer"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| HandlerError::Decode(format!("{key} is not an integer: {s}"))),
        Some(Value::Null) | None => {
            Err(HandlerError::Decode(format!("{key} missing from result")))
        }
        Some(other) => Err(HandlerError::Decode(format!(
            "{key} has unexpected shape: {other}"
        ))),
    }
}

pub(crate) fn i64_or(row: &Row, key: &str, default: i64) -> i64 {
    require_i64(row, key).unwrap_or(default)
}

pub(crate) fn f64_or(row: &Row, key: &str, default: f64) -> f64 {
    match get(row, key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}

/// VARIANT-shaped values may arrive either as structured JSON or as a JSON
/// string; normalize to the structured form.
pub(crate) fn variant(value: &Value, field: &str) -> Result<Value, HandlerError> {
    match value {
        Value::String(s) if s.is_empty() => Ok(Value::Null),
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| HandlerError::Decode(format!("{field} is not valid JSON: {e}"))),
        other => Ok(other.clone()),
    }
}
