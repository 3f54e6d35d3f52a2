//! Projection of document paths into typed index columns.
//!
//! Each declared index gets exactly one value per document: the value at its
//! path converted to the index kind, or `None` (stored as SQL `NULL`) when the
//! path is absent or holds something the kind cannot represent.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::types::{IndexSpec, IndexType, IndexValue};

/// Resolve a dot-separated path against a document.
/// Returns `&Value::Null` if any segment is missing.
pub fn resolve_attr<'a>(doc: &'a Value, path: &str) -> &'a Value {
    let mut current = doc;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return &Value::Null,
        }
    }
    current
}

/// Project the value at `spec.path` into the index kind.
///
/// See [`coerce`] for the per-kind conversion.
pub fn project(doc: &Value, spec: &IndexSpec) -> Option<IndexValue> {
    coerce(resolve_attr(doc, &spec.path), spec.index_type)
}

/// Convert a JSON value into an index kind.
///
/// - `string`: strings as-is; numbers and booleans in their JSON text form.
/// - `integer`: integral numbers; floats are truncated toward zero.
/// - `floating`: any number.
///
/// Nulls, objects, arrays, and mismatched scalars yield `None`.
pub fn coerce(value: &Value, index_type: IndexType) -> Option<IndexValue> {
    match index_type {
        IndexType::String => match value {
            Value::String(s) => Some(IndexValue::String(s.clone())),
            Value::Number(n) => Some(IndexValue::String(n.to_string())),
            Value::Bool(b) => Some(IndexValue::String(b.to_string())),
            _ => None,
        },
        IndexType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(IndexValue::Integer),
            _ => None,
        },
        IndexType::Floating => value.as_f64().map(IndexValue::Floating),
    }
}

/// Bind argument for a predicate on a column of kind `index_type`.
///
/// Uses the same conversion as [`project`], so a query key matches the
/// value stored for an equal document field. Keys the kind cannot hold
/// fall back to [`to_sql_value`].
pub fn bind_value(value: &Value, index_type: IndexType) -> SqlValue {
    match coerce(value, index_type) {
        Some(IndexValue::String(s)) => SqlValue::Text(s),
        Some(IndexValue::Integer(i)) => SqlValue::Integer(i),
        Some(IndexValue::Floating(f)) => SqlValue::Real(f),
        None => to_sql_value(value),
    }
}

/// Convert a JSON bind argument to an SQL value.
///
/// Composite values bind as their JSON text.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert an SQL result value back to JSON.
pub fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Value::from(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::from(bytes),
    }
}
