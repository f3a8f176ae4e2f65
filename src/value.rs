// src/value.rs - Property value model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property value carried through the property store
///
/// This enum represents every value shape the event subsystem reads or
/// publishes: monitored present values, configuration parameters, status
/// flags and transition timestamps.
///
/// # Examples
///
/// ```rust
/// use bacnet_events::Value;
///
/// let int_val = Value::Int(42);
/// let float_val = Value::Float(3.5);
///
/// // Type conversion
/// assert_eq!(int_val.as_float(), Some(42.0));
/// assert_eq!(Value::Bool(true).as_int(), Some(1));
/// assert!(Value::Enumerated(3).loosely_equals(&Value::Float(3.0)));
/// # let _ = float_val;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    /// Absent value (failed read, relinquished command)
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed integer value
    Int(i64),
    /// Unsigned integer value
    Unsigned(u64),
    /// Floating-point value
    Float(f64),
    /// Enumerated value (event state, reliability, multistate value)
    Enumerated(u32),
    /// Character string
    String(String),
    /// Bit string, bit 0 first
    BitString(Vec<bool>),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Convert to boolean if possible
    ///
    /// ```rust
    /// use bacnet_events::Value;
    ///
    /// assert_eq!(Value::Bool(true).as_bool(), Some(true));
    /// assert_eq!(Value::Int(0).as_bool(), Some(false));
    /// assert_eq!(Value::Float(1.0).as_bool(), Some(true));
    /// ```
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Unsigned(u) => Some(*u != 0),
            Value::Enumerated(e) => Some(*e != 0),
            Value::Float(f) => Some(*f != 0.0 && !f.is_nan()),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "active" | "1" => Some(true),
                "false" | "no" | "off" | "inactive" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to integer if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Unsigned(u) => i64::try_from(*u).ok(),
            Value::Enumerated(e) => Some(i64::from(*e)),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a non-negative integer if possible
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(u) => Some(*u),
            other => other.as_int().and_then(|i| u64::try_from(i).ok()),
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Unsigned(u) => Some(*u as f64),
            Value::Enumerated(e) => Some(f64::from(*e)),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the bits of a bit string
    pub fn as_bit_string(&self) -> Option<&[bool]> {
        match self {
            Value::BitString(bits) => Some(bits),
            _ => None,
        }
    }

    /// True for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Compare two values after reconciling their representation
    ///
    /// Numeric shapes (bool, int, unsigned, float, enumerated and numeric
    /// strings) compare by magnitude; everything else compares structurally.
    /// Two nulls are equal, null never equals anything else.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::BitString(a), Value::BitString(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Convert to string representation
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Unsigned(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Enumerated(e) => e.to_string(),
            Value::String(s) => s.clone(),
            Value::BitString(bits) => bits.iter().map(|b| if *b { '1' } else { '0' }).collect(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::Array(a) => {
                let items: Vec<String> = a.iter().map(|v| v.as_string()).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Unsigned(_) => "unsigned",
            Value::Float(_) => "float",
            Value::Enumerated(_) => "enumerated",
            Value::String(_) => "string",
            Value::BitString(_) => "bit-string",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Unsigned(u64::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        // Bool conversions
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::Bool(false).as_int(), Some(0));
        assert_eq!(Value::Bool(true).as_float(), Some(1.0));

        // Int conversions
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::Int(-1).as_unsigned(), None);

        // Float conversions
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Float(0.0).as_bool(), Some(false));
        assert_eq!(Value::Float(42.0).as_int(), Some(42));
        assert_eq!(Value::Float(f64::NAN).as_int(), None);

        assert_eq!(Value::Null.as_float(), None);
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Enumerated(1).loosely_equals(&Value::Bool(true)));
        assert!(Value::Unsigned(7).loosely_equals(&Value::Float(7.0)));
        assert!(Value::String("12".into()).loosely_equals(&Value::Int(12)));
        assert!(!Value::Float(1.5).loosely_equals(&Value::Int(1)));
        assert!(!Value::Null.loosely_equals(&Value::Int(0)));
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(!Value::String("on".into()).loosely_equals(&Value::String("off".into())));
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Enumerated(2).type_name(), "enumerated");
        assert_eq!(Value::BitString(vec![true, false]).to_string(), "10");
    }
}
