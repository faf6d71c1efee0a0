use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::error::DataError;
use crate::value::Value;

/// One `{field, operator, value}` clause of an advanced filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub field: String,
    pub operator: String,
    #[serde(default = "null_value")]
    pub value: Value,
}

fn null_value() -> Value {
    Value::Null
}

impl Clause {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// Declarative description of which rows an operation targets.
///
/// Exactly one shape is interpreted per call. The default is an empty
/// mapping, which matches every row.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// Field (or dotted/`__` path) to expected value, in declaration order.
    Mapping(Vec<(String, Value)>),
    Clauses(Vec<Clause>),
    /// Pre-built predicates, passed through without validation.
    Raw(Vec<Expr>),
}

impl Default for FilterSpec {
    fn default() -> Self {
        FilterSpec::Mapping(Vec::new())
    }
}

impl FilterSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FilterSpec::Mapping(pairs) => pairs.is_empty(),
            FilterSpec::Clauses(clauses) => clauses.is_empty(),
            FilterSpec::Raw(exprs) => exprs.is_empty(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FilterSpec::Mapping(_) => "mapping",
            FilterSpec::Clauses(_) => "clause list",
            FilterSpec::Raw(_) => "raw expression",
        }
    }

    /// Add an equality entry to a mapping specification.
    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self, DataError> {
        match self {
            FilterSpec::Mapping(mut pairs) => {
                pairs.push((field.into(), value.into()));
                Ok(FilterSpec::Mapping(pairs))
            }
            other => Err(DataError::configuration(format!(
                "cannot add a mapping entry to a {} filter specification",
                other.kind_name()
            ))),
        }
    }

    /// Interpret a deserialized request body.
    ///
    /// Accepts an object (mapping), an array of `{field, operator, value}`
    /// objects (clauses) or an array of objects merged in order into one
    /// mapping. Mixing clause-shaped and mapping-shaped items is rejected.
    pub fn from_json(json: serde_json::Value) -> Result<Self, DataError> {
        match json {
            serde_json::Value::Object(map) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (key, value) in map {
                    pairs.push((key.clone(), json_value(&key, value)?));
                }
                Ok(FilterSpec::Mapping(pairs))
            }
            serde_json::Value::Array(items) => {
                let mut clauses = Vec::new();
                let mut pairs = Vec::new();
                for item in items {
                    let serde_json::Value::Object(map) = item else {
                        return Err(DataError::configuration(
                            "filter list items must be JSON objects",
                        ));
                    };
                    if is_clause_shaped(&map) {
                        let clause: Clause = serde_json::from_value(serde_json::Value::Object(map))
                            .map_err(|e| DataError::configuration(format!("invalid filter clause: {e}")))?;
                        clauses.push(clause);
                    } else {
                        for (key, value) in map {
                            pairs.push((key.clone(), json_value(&key, value)?));
                        }
                    }
                    if !clauses.is_empty() && !pairs.is_empty() {
                        return Err(DataError::configuration(
                            "filter list mixes clause objects and field mappings",
                        ));
                    }
                }
                if clauses.is_empty() {
                    Ok(FilterSpec::Mapping(pairs))
                } else {
                    Ok(FilterSpec::Clauses(clauses))
                }
            }
            other => Err(DataError::configuration(format!(
                "unsupported filter specification: {other}"
            ))),
        }
    }
}

fn is_clause_shaped(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    map.contains_key("field")
        && map.contains_key("operator")
        && map
            .keys()
            .all(|k| matches!(k.as_str(), "field" | "operator" | "value"))
}

fn json_value(key: &str, value: serde_json::Value) -> Result<Value, DataError> {
    serde_json::from_value(value)
        .map_err(|e| DataError::configuration(format!("invalid filter value for '{key}': {e}")))
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for FilterSpec {
    fn from(pairs: [(K, V); N]) -> Self {
        FilterSpec::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Vec<(String, Value)>> for FilterSpec {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        FilterSpec::Mapping(pairs)
    }
}

impl From<Vec<Clause>> for FilterSpec {
    fn from(clauses: Vec<Clause>) -> Self {
        FilterSpec::Clauses(clauses)
    }
}

impl From<Clause> for FilterSpec {
    fn from(clause: Clause) -> Self {
        FilterSpec::Clauses(vec![clause])
    }
}

impl From<Expr> for FilterSpec {
    fn from(expr: Expr) -> Self {
        FilterSpec::Raw(vec![expr])
    }
}

impl From<Vec<Expr>> for FilterSpec {
    fn from(exprs: Vec<Expr>) -> Self {
        FilterSpec::Raw(exprs)
    }
}

impl From<()> for FilterSpec {
    fn from(_: ()) -> Self {
        FilterSpec::default()
    }
}

/// Build a mapping [`FilterSpec`] in code.
///
/// ```ignore
/// repo.list(ListOptions::new().filter(filter! { "active" => true, "publisher.name" => "Acme" }))?;
/// ```
#[macro_export]
macro_rules! filter {
    () => {
        $crate::FilterSpec::Mapping(::std::vec::Vec::new())
    };
    ( $( $field:expr => $value:expr ),+ $(,)? ) => {
        $crate::FilterSpec::Mapping(::std::vec![
            $( (::std::string::String::from($field), $crate::Value::from($value)) ),+
        ])
    };
}
