//! Parameter values and assignments.
//!
//! Parameter values are stored as native JSON values so records written by one
//! worker can be read back by any other without a schema.

use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Field name holding a record's objective value. No parameter may use it.
pub const RESULT_FIELD: &str = "result";

/// A concrete parameter value.
pub type ParameterValue = Value;

/// The current assignment: parameter name -> value, ordered by name.
pub type Assignment = BTreeMap<String, ParameterValue>;

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Numeric addition of two JSON values.
///
/// Integer + integer stays integral; anything else involving a float yields a
/// float. Returns `None` if either side is not a number.
pub fn add_values(a: &Value, b: &Value) -> Option<Value> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return None;
    };
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Some(Value::Number(sum.into()));
        }
    }
    let sum = x.as_f64()? + y.as_f64()?;
    Number::from_f64(sum).map(Value::Number)
}
