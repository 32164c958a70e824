use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Number;
use std::fmt;

use crate::json_equal::deep_equal;

/// An opaque handle stored inside a value tree.
///
/// References never travel on the wire as-is: before a tree is split into
/// JSON and buffers, every reference is replaced by its plain form.
pub trait Reference: Clone + fmt::Debug {
    /// Plain value used on the wire (may itself contain binary leaves).
    fn to_plain(&self) -> Value;

    /// Identity comparison.
    fn same_as(&self, other: &Self) -> bool;
}

/// Reference type for trees that cannot hold references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRef {}

impl Reference for NoRef {
    fn to_plain(&self) -> Value {
        match *self {}
    }

    fn same_as(&self, _other: &Self) -> bool {
        match *self {}
    }
}

/// Ordered object map.
pub type Map<R = NoRef> = IndexMap<String, Value<R>>;

/// A JSON-compatible value that may also carry binary data and references.
///
/// Binary leaves are kept distinct from numeric arrays so that they can be
/// split out of the tree and sent out-of-band.
#[derive(Debug, Clone)]
pub enum Value<R = NoRef> {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Raw bytes (the byte-view wrapper of the wire format).
    Binary(Bytes),
    Array(Vec<Value<R>>),
    Object(Map<R>),
    Ref(R),
}

impl<R> Value<R> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value<R>>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<R>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map<R>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&R> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Looks up `key` when this value is an object.
    pub fn get(&self, key: &str) -> Option<&Value<R>> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl<R: Reference> Value<R> {
    /// Lossy conversion to plain JSON.
    ///
    /// References become their plain form; binary leaves become arrays of
    /// byte numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(r) => r.to_plain().to_json(),
        }
    }

    /// Replaces every reference with its plain form.
    pub fn to_plain(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(n.clone()),
            Value::String(s) => Value::String(s.clone()),
            Value::Binary(bytes) => Value::Binary(bytes.clone()),
            Value::Array(items) => Value::Array(items.iter().map(Value::to_plain).collect()),
            Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_plain())).collect())
            }
            Value::Ref(r) => r.to_plain(),
        }
    }
}

impl Value {
    /// Widens a plain tree so it can hold references of type `R`.
    pub fn widen<R>(self) -> Value<R> {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(b),
            Value::Number(n) => Value::Number(n),
            Value::String(s) => Value::String(s),
            Value::Binary(bytes) => Value::Binary(bytes),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| v.widen()).collect()),
            Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.widen())).collect())
            }
            Value::Ref(r) => match r {},
        }
    }
}

impl<R> Default for Value<R> {
    fn default() -> Self {
        Value::Null
    }
}

impl<R: Reference> PartialEq for Value<R> {
    fn eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

impl<R> From<serde_json::Value> for Value<R> {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl<R> From<bool> for Value<R> {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<R> From<i64> for Value<R> {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl<R> From<i32> for Value<R> {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl<R> From<u64> for Value<R> {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl<R> From<f64> for Value<R> {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl<R> From<&str> for Value<R> {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl<R> From<String> for Value<R> {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<R> From<Bytes> for Value<R> {
    fn from(bytes: Bytes) -> Self {
        Value::Binary(bytes)
    }
}

impl<R> From<Vec<Value<R>>> for Value<R> {
    fn from(items: Vec<Value<R>>) -> Self {
        Value::Array(items)
    }
}

impl<R> From<Map<R>> for Value<R> {
    fn from(map: Map<R>) -> Self {
        Value::Object(map)
    }
}
