//! Filter specifications and their conversion into predicates.
//!
//! A [`FilterSpec`] is plain data (it can come straight from a request
//! body). [`convert`] resolves it against an entity's metadata using one of
//! the [`FilterStrategy`] grammars and yields [`Expr`] predicates that
//! sessions know how to execute.

mod convert;
mod expr;
mod spec;

pub use convert::convert;
pub use expr::{escape_like, like_matches, CompareOp, Expr};
pub use spec::{Clause, FilterSpec};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DataError;

/// Grammar used to interpret a [`FilterSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterStrategy {
    /// Mapping entries are equality predicates; dotted paths follow relationships.
    #[default]
    Simple,
    /// `{field, operator, value}` clauses.
    Advanced,
    /// Mapping keys use `__` paths ending in an optional lookup (`age__gte`).
    DjangoLike,
    /// Only pre-built expressions are accepted.
    Raw,
}

impl FilterStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterStrategy::Simple => "simple",
            FilterStrategy::Advanced => "advanced",
            FilterStrategy::DjangoLike => "django-like",
            FilterStrategy::Raw => "raw",
        }
    }
}

impl FromStr for FilterStrategy {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(FilterStrategy::Simple),
            "advanced" => Ok(FilterStrategy::Advanced),
            "django" | "django-like" | "django_like" => Ok(FilterStrategy::DjangoLike),
            "raw" => Ok(FilterStrategy::Raw),
            other => Err(DataError::configuration(format!(
                "unknown filter strategy '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for FilterStrategy {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterStrategy> for String {
    fn from(strategy: FilterStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl std::fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names() {
        assert_eq!("django".parse::<FilterStrategy>().unwrap(), FilterStrategy::DjangoLike);
        assert_eq!("Advanced".parse::<FilterStrategy>().unwrap(), FilterStrategy::Advanced);
        let err = "fuzzy".parse::<FilterStrategy>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn strategy_serde() {
        let strategy: FilterStrategy = serde_yaml::from_str("django-like").unwrap();
        assert_eq!(strategy, FilterStrategy::DjangoLike);
        assert!(serde_yaml::from_str::<FilterStrategy>("fuzzy").is_err());
        assert_eq!(serde_json::to_string(&FilterStrategy::Raw).unwrap(), "\"raw\"");
    }
}
