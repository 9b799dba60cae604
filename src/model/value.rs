//! Typed values used for sort keys and facet buckets

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single sortable or facetable value.
///
/// Values of different types are ordered by type bracket:
/// `Null < Number < String < Uuid < Bool < Date`. Where null lands relative
/// to a query's sort order is decided by the ordering, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Uuid(Uuid),
    Date(DateTime<Utc>),
}

impl TypedValue {
    fn bracket(&self) -> u8 {
        match self {
            TypedValue::Null => 0,
            TypedValue::Number(_) => 1,
            TypedValue::String(_) => 2,
            TypedValue::Uuid(_) => 3,
            TypedValue::Bool(_) => 4,
            TypedValue::Date(_) => 5,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Convert a stored JSON field into a typed value.
    ///
    /// Plain JSON scalars map directly. Dates and UUIDs are written as
    /// `{"$date": "<rfc3339>"}` and `{"$uuid": "<hyphenated>"}`. Anything
    /// else (arrays, other objects, unparseable tags) is `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(TypedValue::Null),
            Value::Bool(b) => Some(TypedValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(TypedValue::Number),
            Value::String(s) => Some(TypedValue::String(s.clone())),
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::String(raw)) = map.get("$date") {
                    DateTime::parse_from_rfc3339(raw)
                        .ok()
                        .map(|d| TypedValue::Date(d.with_timezone(&Utc)))
                } else if let Some(Value::String(raw)) = map.get("$uuid") {
                    Uuid::parse_str(raw).ok().map(TypedValue::Uuid)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Inverse of [`TypedValue::from_json`].
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Null => Value::Null,
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Uuid(u) => serde_json::json!({ "$uuid": u.to_string() }),
            TypedValue::Date(d) => serde_json::json!({ "$date": d.to_rfc3339() }),
        }
    }
}

fn normalized_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0.0f64.to_bits()
    } else {
        n.to_bits()
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    // NaN sorts above every number and equal to itself
    a.partial_cmp(&b)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TypedValue {}

impl Hash for TypedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bracket().hash(state);
        match self {
            TypedValue::Null => {}
            TypedValue::Bool(b) => b.hash(state),
            TypedValue::Number(n) => normalized_bits(*n).hash(state),
            TypedValue::String(s) => s.hash(state),
            TypedValue::Uuid(u) => u.hash(state),
            TypedValue::Date(d) => d.hash(state),
        }
    }
}

impl PartialOrd for TypedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => Ordering::Equal,
            (TypedValue::Bool(a), TypedValue::Bool(b)) => a.cmp(b),
            (TypedValue::Number(a), TypedValue::Number(b)) => compare_numbers(*a, *b),
            (TypedValue::String(a), TypedValue::String(b)) => a.cmp(b),
            (TypedValue::Uuid(a), TypedValue::Uuid(b)) => a.cmp(b),
            (TypedValue::Date(a), TypedValue::Date(b)) => a.cmp(b),
            _ => self.bracket().cmp(&other.bracket()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => write!(f, "null"),
            TypedValue::Bool(b) => write!(f, "{}", b),
            TypedValue::Number(n) => write!(f, "{}", n),
            TypedValue::String(s) => write!(f, "{}", s),
            TypedValue::Uuid(u) => write!(f, "{}", u),
            TypedValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

impl From<f64> for TypedValue {
    fn from(n: f64) -> Self {
        TypedValue::Number(n)
    }
}

impl From<&str> for TypedValue {
    fn from(s: &str) -> Self {
        TypedValue::String(s.to_string())
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(d: DateTime<Utc>) -> Self {
        TypedValue::Date(d)
    }
}
