//! Attribute values.
//!
//! Attributes hold numbers, text or booleans. Absence (`null`/`undefined` in
//! content formulas) is modelled as `Option::None` at every call site rather
//! than as a variant, so "no value" can never be confused with zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single attribute value.
///
/// Coercions follow the loose rules content formulas were written against:
/// numeric-looking text behaves as a number, `+` concatenates when either
/// side is non-numeric text, and truthiness treats `0`, `""` and `false` as
/// false.
///
/// # Examples
///
/// ```rust
/// use rulegraph::Value;
///
/// assert_eq!(Value::from(10.0).to_string(), "10");
/// assert_eq!(Value::from("1/2").to_string(), "1/2");
/// assert!(Value::from("3").loose_eq(&Value::from(3.0)));
/// assert!(!Value::from(0.0).truthy());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Numeric view, if one exists.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            Value::Number(_) => None,
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    t.parse::<f64>().ok()
                }
            }
        }
    }

    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Loose equality: numeric when both sides are numeric, textual otherwise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self.as_text() == other.as_text(),
        }
    }

    /// Loose ordering used by `<`, `>=`, ... Returns `None` when the values
    /// are not comparable.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (self, other) {
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }

    /// `+`: numeric sum, or concatenation when either side is non-numeric text.
    pub fn plus(&self, other: &Value) -> Option<Value> {
        let textual = |v: &Value| matches!(v, Value::Text(_)) && v.as_number().is_none();
        if textual(self) || textual(other) {
            return Some(Value::Text(format!("{}{}", self, other)));
        }
        Some(Value::Number(self.as_number()? + other.as_number()?))
    }

    pub fn times(&self, other: &Value) -> Option<Value> {
        Some(Value::Number(self.as_number()? * other.as_number()?))
    }

    /// Larger of two values; a non-numeric side loses to a numeric one.
    pub fn max(self, other: Value) -> Value {
        match self.loose_cmp(&other) {
            Some(Ordering::Less) => other,
            Some(_) => self,
            None if self.as_number().is_some() => self,
            None => other,
        }
    }

    /// Smaller of two values; a non-numeric side loses to a numeric one.
    pub fn min(self, other: Value) -> Value {
        match self.loose_cmp(&other) {
            Some(Ordering::Greater) => other,
            Some(_) => self,
            None if self.as_number().is_some() => self,
            None => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
