//! Value types for expression evaluation

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Scalar value produced while evaluating an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
    /// Null value (also the result of resolving an undefined variable)
    Null,
}

impl Value {
    /// Check if the value is truthy
    ///
    /// `null` is false; numbers are true unless zero; strings are true unless
    /// empty, `"false"`, or `"0"`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty() && s != "false" && s != "0",
            Value::Null => false,
        }
    }

    /// Convert to a number, if the value has a numeric reading
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            Value::Null => None,
        }
    }

    /// Display form used when a value is compared against a string
    pub fn as_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
        }
    }

    /// Project a JSON value into the expression value space
    ///
    /// Arrays and objects compare and display by their compact JSON form.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            JsonValue::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}
