//! Typed attribute values.
//!
//! Constraint operands are kept as strings on the query graph (that is what a
//! user typed, and what query XML stores); the compiler parses them into
//! [`Value`]s against the attribute type of the constrained node.

use std::cmp::Ordering;
use std::fmt;

use pathmine_model::AttributeType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Parse user input for an attribute of type `ty`. Numeric input may use
    /// `,` as a thousands separator.
    pub fn parse(ty: AttributeType, raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        match ty {
            AttributeType::String | AttributeType::Date => Ok(Value::String(raw.to_string())),
            AttributeType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(format!("`{raw}` is not a boolean")),
            },
            ty if ty.is_integral() => {
                let digits = trimmed.replace(',', "");
                let n: i64 = digits
                    .parse()
                    .map_err(|_| format!("`{raw}` is not an integer"))?;
                let fits = match ty {
                    AttributeType::Short => i16::try_from(n).is_ok(),
                    AttributeType::Integer => i32::try_from(n).is_ok(),
                    _ => true,
                };
                if fits {
                    Ok(Value::Integer(n))
                } else {
                    Err(format!("`{raw}` is out of range for {}", ty.type_name()))
                }
            }
            _ => trimmed
                .replace(',', "")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("`{raw}` is not a number")),
        }
    }

    /// Convert a JSON scalar (object-store data) to a value of type `ty`.
    pub fn from_json(ty: AttributeType, json: &serde_json::Value) -> Option<Self> {
        match (ty, json) {
            (AttributeType::Boolean, serde_json::Value::Bool(b)) => Some(Value::Boolean(*b)),
            (ty, serde_json::Value::Number(n)) if ty.is_integral() => n.as_i64().map(Value::Integer),
            (ty, serde_json::Value::Number(n)) if ty.is_numeric() => n.as_f64().map(Value::Float),
            (AttributeType::String | AttributeType::Date, serde_json::Value::String(s)) => {
                Some(Value::String(s.clone()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering between two values of compatible types. Integers and floats
    /// compare numerically; anything else mixed is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality used by constraints: numeric across int/float, otherwise
    /// structural.
    pub fn matches(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Wildcard match for `LIKE`: `*` matches any run of characters,
/// case-insensitively.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}
