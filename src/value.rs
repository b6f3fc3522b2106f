//! The typed value carried by bindings and rendered by the dialect engine.
//!
//! Grounded in the bind-value enum pattern used by query-builder crates in
//! the wild (an owned, dialect-agnostic value that the dialect engine alone
//! knows how to escape or bind) rather than exposing driver-specific types
//! at the builder surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    /// A JSON object, rendered as `jsonb`/`json` literal depending on dialect.
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! impl_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i64, I64);
impl_from!(i32, I64);
impl_from!(f64, F64);
impl_from!(String, Text);
impl_from!(Vec<u8>, Bytes);
impl_from!(DateTime<Utc>, Timestamp);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Converts a single value to its untagged `serde_json::Value` shape —
/// the plain JSON a dialect's `json`/`jsonb` literal should contain, not
/// the tagged shape `Value`'s own `#[derive(Serialize)]` would produce.
pub(crate) fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I64(n) => serde_json::Value::from(*n),
        Value::F64(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect(),
        ),
    }
}

/// Canonical JSON used by the cache fingerprint. Map keys are sorted
/// (`BTreeMap` and `serde_json`'s default object ordering) so the same
/// logical bindings always hash identically regardless of construction
/// order.
pub fn canonical_json(bindings: &[Value]) -> String {
    let json: Vec<serde_json::Value> = bindings.iter().map(value_to_json).collect();
    serde_json::to_string(&json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_stable_across_construction_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), Value::I64(2));
        a.insert("a".to_string(), Value::I64(1));
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), Value::I64(1));
        b.insert("b".to_string(), Value::I64(2));
        assert_eq!(
            canonical_json(&[Value::Object(a)]),
            canonical_json(&[Value::Object(b)])
        );
    }

    #[test]
    fn option_none_becomes_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
    }
}
