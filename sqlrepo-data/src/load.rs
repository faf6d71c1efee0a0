//! Eager-loading policy resolution.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::entity::EntityMeta;
use crate::error::DataError;

/// How a relationship is fetched alongside its parent rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LoadStrategy {
    /// Outer join in the parent query.
    Joined,
    /// Second query over a subquery of the parent selection.
    Subquery,
    /// Second query with `IN` over the parent keys.
    #[default]
    SelectIn,
    /// Per-row query issued right after the parents.
    Immediate,
    /// Left for access-time loading; not populated by the repository.
    Lazy,
    /// Accessing the relationship is an error; never populated.
    Raise,
    NoLoad,
}

impl LoadStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStrategy::Joined => "joined",
            LoadStrategy::Subquery => "subquery",
            LoadStrategy::SelectIn => "selectin",
            LoadStrategy::Immediate => "immediate",
            LoadStrategy::Lazy => "lazy",
            LoadStrategy::Raise => "raise",
            LoadStrategy::NoLoad => "noload",
        }
    }

    /// Whether query execution fills the relationship.
    pub fn populates(self) -> bool {
        matches!(
            self,
            LoadStrategy::Joined | LoadStrategy::Subquery | LoadStrategy::SelectIn | LoadStrategy::Immediate
        )
    }
}

impl FromStr for LoadStrategy {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "joined" | "join" => Ok(LoadStrategy::Joined),
            "subquery" => Ok(LoadStrategy::Subquery),
            "selectin" => Ok(LoadStrategy::SelectIn),
            "immediate" => Ok(LoadStrategy::Immediate),
            "lazy" | "select" => Ok(LoadStrategy::Lazy),
            "raise" | "raise-on-access" | "raise_on_access" => Ok(LoadStrategy::Raise),
            "noload" | "no-load" | "no_load" => Ok(LoadStrategy::NoLoad),
            other => Err(DataError::configuration(format!("unknown load strategy '{other}'"))),
        }
    }
}

impl TryFrom<String> for LoadStrategy {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LoadStrategy> for String {
    fn from(strategy: LoadStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl std::fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved relationship path and the strategy to load it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDirective {
    pub path: Vec<String>,
    pub strategy: LoadStrategy,
}

impl LoadDirective {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// True when this directive loads a relationship directly below `prefix`.
    pub fn is_child_of(&self, prefix: &[String]) -> bool {
        self.path.len() == prefix.len() + 1 && self.path.starts_with(prefix)
    }

    pub fn relation(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }
}

/// Per-call eager-loading request.
///
/// `default` replaces the repository's default strategy for every direct
/// relationship; `overrides` set the strategy of single (possibly nested,
/// dot-separated) relationship paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub default: Option<LoadStrategy>,
    pub overrides: Vec<(String, LoadStrategy)>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load nothing unless explicitly overridden.
    pub fn none() -> Self {
        Self::new().with_default(LoadStrategy::NoLoad)
    }

    pub fn with_default(mut self, strategy: LoadStrategy) -> Self {
        self.default = Some(strategy);
        self
    }

    pub fn with(mut self, path: impl Into<String>, strategy: LoadStrategy) -> Self {
        self.overrides.push((path.into(), strategy));
        self
    }
}

/// Resolve a load request into directives for `meta`.
///
/// Every direct relationship gets the default strategy; overrides replace a
/// single relationship's strategy or add a nested path. Nested
/// relationships are only loaded when named.
pub fn resolve(
    meta: &EntityMeta,
    options: &LoadOptions,
    default: LoadStrategy,
) -> Result<Vec<LoadDirective>, DataError> {
    let default = options.default.unwrap_or(default);
    let mut directives: Vec<LoadDirective> = meta
        .relations()
        .iter()
        .map(|relation| LoadDirective {
            path: vec![relation.name.to_string()],
            strategy: default,
        })
        .collect();

    for (path, strategy) in &options.overrides {
        let segments = validate_path(meta, path)?;
        match directives.iter_mut().find(|d| d.path == segments) {
            Some(existing) => existing.strategy = *strategy,
            None => directives.push(LoadDirective {
                path: segments,
                strategy: *strategy,
            }),
        }
    }
    Ok(directives)
}

fn validate_path(meta: &EntityMeta, path: &str) -> Result<Vec<String>, DataError> {
    let mut owner = meta;
    let mut segments = Vec::new();
    for segment in path.split('.') {
        let relation = owner.relation(segment).ok_or_else(|| {
            DataError::configuration(format!(
                "unknown relationship '{segment}' on entity {} (load path '{path}')",
                owner.name
            ))
        })?;
        segments.push(segment.to_string());
        owner = relation.target();
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::testing::{Player, Team};

    #[test]
    fn default_applies_to_direct_relationships_only() {
        let directives = resolve(Team::meta(), &LoadOptions::new(), LoadStrategy::SelectIn).unwrap();
        assert_eq!(
            directives,
            vec![
                LoadDirective { path: vec!["players".into()], strategy: LoadStrategy::SelectIn },
                LoadDirective { path: vec!["league".into()], strategy: LoadStrategy::SelectIn },
            ]
        );
    }

    #[test]
    fn override_replaces_one_relationship() {
        let options = LoadOptions::new()
            .with("league", LoadStrategy::Raise)
            .with("players.team", LoadStrategy::Joined);
        let directives = resolve(Team::meta(), &options, LoadStrategy::SelectIn).unwrap();
        assert_eq!(directives[0].strategy, LoadStrategy::SelectIn);
        assert_eq!(directives[1].strategy, LoadStrategy::Raise);
        assert_eq!(directives[2].path, vec!["players".to_string(), "team".to_string()]);
        assert!(directives[2].is_child_of(&["players".to_string()]));
    }

    #[test]
    fn unknown_relationship_is_configuration_error() {
        let err = resolve(Player::meta(), &LoadOptions::new().with("coach", LoadStrategy::Joined), LoadStrategy::SelectIn)
            .unwrap_err();
        assert!(err.is_configuration());
        let err = resolve(Player::meta(), &LoadOptions::new().with("team.coach", LoadStrategy::Joined), LoadStrategy::SelectIn)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn strategy_aliases() {
        assert_eq!("join".parse::<LoadStrategy>().unwrap(), LoadStrategy::Joined);
        assert_eq!("raise-on-access".parse::<LoadStrategy>().unwrap(), LoadStrategy::Raise);
        assert_eq!("no-load".parse::<LoadStrategy>().unwrap(), LoadStrategy::NoLoad);
        assert!("eager".parse::<LoadStrategy>().is_err());
        assert!(!LoadStrategy::Lazy.populates());
    }
}
