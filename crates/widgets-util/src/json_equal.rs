//! Deep equality for value trees.

use serde_json::Number;

use crate::value::{Map, Reference, Value};

/// Performs a deep equality check between two values.
///
/// - numbers compare numerically, so `1` equals `1.0`
/// - objects compare key-by-key regardless of insertion order
/// - binary leaves compare byte-wise
/// - references compare by identity
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use widgets_util::{deep_equal, Value};
///
/// let a: Value = json!({"foo": [1, 2, 3]}).into();
/// let b: Value = json!({"foo": [1.0, 2, 3]}).into();
/// let c: Value = json!({"foo": [1, 2, 4]}).into();
///
/// assert!(deep_equal(&a, &b));
/// assert!(!deep_equal(&a, &c));
/// ```
pub fn deep_equal<R: Reference>(a: &Value<R>, b: &Value<R>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => number_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Binary(a), Value::Binary(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => a.same_as(b),

        (Value::Array(arr_a), Value::Array(arr_b)) => {
            if arr_a.len() != arr_b.len() {
                return false;
            }
            arr_a.iter().zip(arr_b).all(|(x, y)| deep_equal(x, y))
        }

        (Value::Object(obj_a), Value::Object(obj_b)) => map_equal(obj_a, obj_b),

        // Different types are never equal
        _ => false,
    }
}

/// Key-by-key deep equality of two object maps.
pub fn map_equal<R: Reference>(a: &Map<R>, b: &Map<R>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(key, val_a)| match b.get(key) {
        Some(val_b) => deep_equal(val_a, val_b),
        None => false,
    })
}

/// Optional-aware equality: a missing value only equals another missing value.
pub fn option_equal<R: Reference>(a: Option<&Value<R>>, b: Option<&Value<R>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}

fn number_equal(a: &Number, b: &Number) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
