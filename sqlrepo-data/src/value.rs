use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::entity::FieldKind;
use crate::error::DataError;

/// A single column value, independent of any database driver.
///
/// Deserializes from plain JSON/YAML scalars and arrays so filter and data
/// mappings can be built straight from a request body. Strings stay
/// [`Value::Text`] until [`Value::coerce`] converts them to the declared
/// column kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Order two values of compatible kinds. Integers and floats compare
    /// numerically; anything else across kinds (and `Null`) is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Convert a literal to the representation of a column of `kind`.
    ///
    /// Returns `None` when the literal cannot represent such a column value.
    /// `Null` passes through; nullability is checked by the caller.
    pub fn coerce(&self, kind: FieldKind) -> Option<Value> {
        match (kind, self) {
            (_, Value::Null) => Some(Value::Null),
            (_, Value::List(_)) => None,
            (FieldKind::Integer, Value::Int(_)) => Some(self.clone()),
            (FieldKind::Integer, Value::Float(f)) => float_to_int(*f).map(Value::Int),
            (FieldKind::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
            (FieldKind::Float, Value::Float(_)) => Some(self.clone()),
            (FieldKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (FieldKind::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
            (FieldKind::Text, Value::Text(_)) => Some(self.clone()),
            (FieldKind::Boolean, Value::Bool(_)) => Some(self.clone()),
            (FieldKind::Boolean, Value::Int(0)) => Some(Value::Bool(false)),
            (FieldKind::Boolean, Value::Int(1)) => Some(Value::Bool(true)),
            (FieldKind::Boolean, Value::Text(s)) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (FieldKind::Timestamp, Value::Timestamp(_)) => Some(self.clone()),
            (FieldKind::Timestamp, Value::Text(s)) => parse_timestamp(s).map(Value::Timestamp),
            _ => None,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Trait for converting a [`Value`] into a concrete Rust type.
///
/// Used by [`Entity::from_record`](crate::Entity::from_record)
/// implementations through [`Record::extract`](crate::Record::extract).
pub trait FromValue: Sized {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError>;
}

fn mismatch(field: &str, expected: &str, value: &Value) -> DataError {
    DataError::Configuration(format!(
        "field '{field}' expects {expected}, got {}",
        value.type_name()
    ))
}

/// Integral floats within `i64` range; `2^63` itself is out of range.
fn float_to_int(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

impl FromValue for Value {
    fn from_value(value: &Value, _field: &str) -> Result<Self, DataError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch(field, "integer", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        let wide = i64::from_value(value, field)?;
        i32::try_from(wide).map_err(|_| mismatch(field, "32-bit integer", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => Err(mismatch(field, "float", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(field, "bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch(field, "text", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch(field, "timestamp", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value, field: &str) -> Result<Self, DataError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other, field).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deserializes_plain_json() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, true, 3, 2.5, "x", [1, 2]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Text("x".into()),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ]
        );
    }

    #[test]
    fn coerces_text_to_timestamp() {
        let coerced = Value::from("2024-03-01T10:00:00Z").coerce(FieldKind::Timestamp);
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(coerced, Some(Value::Timestamp(expected)));

        let naive = Value::from("2024-03-01 10:00:00").coerce(FieldKind::Timestamp);
        assert_eq!(naive, Some(Value::Timestamp(expected)));
    }

    #[test]
    fn coercion_rejects_incompatible_literals() {
        assert_eq!(Value::from("abc").coerce(FieldKind::Integer), None);
        assert_eq!(Value::from(2).coerce(FieldKind::Boolean), None);
        assert_eq!(Value::from(vec![1, 2]).coerce(FieldKind::Integer), None);
        assert_eq!(Value::from(1).coerce(FieldKind::Boolean), Some(Value::Bool(true)));
        assert_eq!(Value::from(3).coerce(FieldKind::Float), Some(Value::Float(3.0)));
    }

    #[test]
    fn float_to_integer_needs_an_integral_value_in_range() {
        assert_eq!(Value::Float(3.0).coerce(FieldKind::Integer), Some(Value::Int(3)));
        assert_eq!(Value::Float(-4.0).coerce(FieldKind::Integer), Some(Value::Int(-4)));
        assert_eq!(Value::Float(2.5).coerce(FieldKind::Integer), None);
        assert_eq!(Value::Float(1e20).coerce(FieldKind::Integer), None);
        assert_eq!(Value::Float(-1e20).coerce(FieldKind::Integer), None);
        assert_eq!(Value::Float(9_223_372_036_854_775_808.0).coerce(FieldKind::Integer), None);
        assert_eq!(Value::Float(f64::NAN).coerce(FieldKind::Integer), None);
        assert_eq!(Value::Float(f64::INFINITY).coerce(FieldKind::Integer), None);
        assert_eq!(
            Value::Float(-9_223_372_036_854_775_808.0).coerce(FieldKind::Integer),
            Some(Value::Int(i64::MIN))
        );
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn option_extraction() {
        assert_eq!(Option::<i64>::from_value(&Value::Null, "x").unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(4), "x").unwrap(), Some(4));
        let err = String::from_value(&Value::Int(4), "name").unwrap_err();
        assert!(err.is_configuration());
    }
}
