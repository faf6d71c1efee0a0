//! Statement types and the pure helpers repositories compose them with.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::config::{AllowedNoneFields, DisableFieldType, RepositoryConfig};
use crate::entity::{EntityMeta, FieldKind, Record, RelationMeta};
use crate::error::DataError;
use crate::filter::{escape_like, Expr};
use crate::load::LoadDirective;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `"name"`, `"-name"`, `"name asc"` or `"name desc"`.
    pub fn parse(term: &str) -> Result<Self, DataError> {
        let term = term.trim();
        if let Some(field) = term.strip_prefix('-') {
            return Ok(Self::desc(field.trim()));
        }
        let mut parts = term.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| DataError::configuration("empty order_by term"))?;
        let direction = match parts.next().map(str::to_lowercase).as_deref() {
            None | Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => {
                return Err(DataError::configuration(format!(
                    "unknown order direction '{other}' in '{term}'"
                )))
            }
        };
        if parts.next().is_some() {
            return Err(DataError::configuration(format!("malformed order_by term '{term}'")));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }

    /// Parse a comma-separated list such as `"-created_at,name"`.
    pub fn parse_list(terms: &str) -> Result<Vec<Self>, DataError> {
        terms
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Join path and column of the term; `team.name` orders on the `name`
    /// column of the `team` join.
    pub fn split(&self) -> (Option<&str>, &str) {
        match self.field.rsplit_once('.') {
            Some((path, column)) => (Some(path), column),
            None => (None, self.field.as_str()),
        }
    }

    pub fn validate(&self, meta: &'static EntityMeta, joins: &[Join]) -> Result<(), DataError> {
        match self.split() {
            (None, column) => meta.require_field(column).map(|_| ()),
            (Some(path), column) => {
                let join = joins.iter().find(|join| join.key() == path).ok_or_else(|| {
                    DataError::configuration(format!(
                        "order term '{}' needs a join on '{path}'",
                        self.field
                    ))
                })?;
                join.target(meta)?.require_field(column).map(|_| ())
            }
        }
    }
}

impl std::fmt::Display for OrderBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{}", self.field),
            Direction::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// Free-text search over text columns (`LIKE %term%`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub term: String,
    pub fields: Vec<String>,
    /// Require every field to match instead of any.
    pub match_all: bool,
    pub case_sensitive: bool,
}

impl Search {
    pub fn new<I, S>(term: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            term: term.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            match_all: false,
            case_sensitive: false,
        }
    }

    pub fn match_all(mut self) -> Self {
        self.match_all = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// `None` when there is nothing to search for.
    pub fn to_expr(&self, meta: &EntityMeta) -> Result<Option<Expr>, DataError> {
        if self.term.is_empty() || self.fields.is_empty() {
            return Ok(None);
        }
        let pattern = format!("%{}%", escape_like(&self.term));
        let mut exprs = Vec::with_capacity(self.fields.len());
        for name in &self.fields {
            let field = meta.require_field(name)?;
            if field.kind != FieldKind::Text {
                return Err(DataError::configuration(format!(
                    "search field {}.{} is not a text column",
                    meta.name, field.name
                )));
            }
            exprs.push(Expr::like(field.name, pattern.clone(), !self.case_sensitive));
        }
        Ok(Some(if self.match_all {
            Expr::and(exprs)
        } else {
            Expr::or(exprs)
        }))
    }
}

/// Inner join along a relationship path such as `team.league`.
///
/// Rows without a related row drop out, and a to-many hop repeats its
/// parent row once per related row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub path: Vec<String>,
    /// The last hop is a to-many relationship.
    pub collection: bool,
}

impl Join {
    pub fn key(&self) -> String {
        self.path.join(".")
    }

    /// Key of the join this one hangs off; empty for a join on the root.
    pub fn parent_key(&self) -> String {
        self.path[..self.path.len().saturating_sub(1)].join(".")
    }

    /// Owning entity and relationship of the last hop, walked from `root`.
    pub fn relation(
        &self,
        root: &'static EntityMeta,
    ) -> Result<(&'static EntityMeta, &'static RelationMeta), DataError> {
        walk_relations(root, &self.path)
    }

    pub fn target(&self, root: &'static EntityMeta) -> Result<&'static EntityMeta, DataError> {
        Ok(self.relation(root)?.1.target())
    }
}

fn walk_relations(
    root: &'static EntityMeta,
    path: &[String],
) -> Result<(&'static EntityMeta, &'static RelationMeta), DataError> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| DataError::configuration("empty join path"))?;
    let hop = |owner: &'static EntityMeta, segment: &String| {
        owner.relation(segment).ok_or_else(|| DataError::PathResolution {
            entity: owner.name.to_string(),
            path: path.join("."),
            segment: segment.clone(),
        })
    };
    let mut owner = root;
    for segment in parents {
        owner = hop(owner, segment)?.target();
    }
    Ok((owner, hop(owner, last)?))
}

/// Resolve dotted relationship paths into joins.
///
/// Every prefix of a nested path is joined first, and each path is joined
/// once however often it is named.
pub fn resolve_joins(meta: &'static EntityMeta, paths: &[String]) -> Result<Vec<Join>, DataError> {
    let mut joins: Vec<Join> = Vec::new();
    for path in paths {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(DataError::configuration(format!("malformed join path '{path}'")));
        }
        for depth in 1..=segments.len() {
            let prefix = &segments[..depth];
            if joins.iter().any(|join| join.path == prefix) {
                continue;
            }
            let (_, relation) = walk_relations(meta, prefix)?;
            joins.push(Join {
                path: prefix.to_vec(),
                collection: relation.is_collection(),
            });
        }
    }
    Ok(joins)
}

#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub entity: &'static EntityMeta,
    pub filters: Vec<Expr>,
    /// Applied in order; a join's parent always precedes it.
    pub joins: Vec<Join>,
    pub loads: Vec<LoadDirective>,
    pub order_by: Vec<OrderBy>,
    pub offset: Option<u64>,
    /// `Some(0)` selects no rows.
    pub limit: Option<u64>,
}

impl SelectQuery {
    pub fn new(entity: &'static EntityMeta) -> Self {
        Self {
            entity,
            filters: Vec::new(),
            joins: Vec::new(),
            loads: Vec::new(),
            order_by: Vec::new(),
            offset: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CountQuery {
    pub entity: &'static EntityMeta,
    pub filters: Vec<Expr>,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub entity: &'static EntityMeta,
    /// Column values in metadata order.
    pub values: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub entity: &'static EntityMeta,
    pub filters: Vec<Expr>,
    pub values: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub entity: &'static EntityMeta,
    pub filters: Vec<Expr>,
}

/// Hashable form of an identity value. Floats compare by bit pattern.
#[derive(PartialEq, Eq, Hash)]
enum IdentityKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    List(Vec<IdentityKey>),
    Timestamp(DateTime<Utc>),
}

impl From<&Value> for IdentityKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IdentityKey::Null,
            Value::Bool(b) => IdentityKey::Bool(*b),
            Value::Int(i) => IdentityKey::Int(*i),
            Value::Float(f) => IdentityKey::Float(f.to_bits()),
            Value::Text(s) => IdentityKey::Text(s.clone()),
            Value::List(items) => IdentityKey::List(items.iter().map(IdentityKey::from).collect()),
            Value::Timestamp(t) => IdentityKey::Timestamp(*t),
        }
    }
}

/// Drop rows whose `key` value was already seen, keeping first-seen order.
pub fn unique_by_identity(records: Vec<Record>, key: &str) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(IdentityKey::from(record.get(key).unwrap_or(&Value::Null))))
        .collect()
}

/// Column, value and extra predicate used to disable rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DisablePlan {
    pub field: String,
    pub id_field: String,
    pub disabled_value: Value,
    /// Excludes rows that are already disabled.
    pub enabled_filter: Option<Expr>,
}

impl DisablePlan {
    pub fn from_config(
        config: &RepositoryConfig,
        meta: &EntityMeta,
        now: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        let (Some(field_type), Some(field), Some(id_field)) = (
            config.disable_field_type,
            config.disable_field.as_deref(),
            config.disable_id_field.as_deref(),
        ) else {
            return Err(DataError::Attribute(format!(
                "{} repository needs disable_field_type, disable_field and disable_id_field to disable rows",
                meta.name
            )));
        };
        meta.require_field(field)?;
        meta.require_field(id_field)?;
        let (disabled_value, enabled_filter) = match field_type {
            DisableFieldType::Bool => (
                Value::Bool(true),
                Expr::Is {
                    field: field.to_string(),
                    value: Value::Bool(true),
                    negated: true,
                },
            ),
            DisableFieldType::Datetime => (Value::Timestamp(now), Expr::is_null(field)),
        };
        Ok(Self {
            field: field.to_string(),
            id_field: id_field.to_string(),
            disabled_value,
            enabled_filter: config.allow_disable_filter_by_value.then_some(enabled_filter),
        })
    }

    /// Predicate restricting the update to the given identifiers.
    pub fn ids_filter(&self, meta: &EntityMeta, ids: &[Value]) -> Result<Expr, DataError> {
        if ids.is_empty() {
            return Err(DataError::configuration(
                "disable_ids requires at least one identifier",
            ));
        }
        let id_field = meta.require_field(&self.id_field)?;
        let values = ids
            .iter()
            .map(|id| {
                id.coerce(id_field.kind).ok_or_else(|| {
                    DataError::configuration(format!(
                        "identifier {id} is not valid for {}.{}",
                        meta.name, id_field.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expr::in_list(id_field.name, values))
    }
}

fn coerce_column(meta: &EntityMeta, name: &str, value: &Value) -> Result<Value, DataError> {
    let field = meta.require_field(name)?;
    value.coerce(field.kind).ok_or_else(|| {
        DataError::configuration(format!(
            "value {value} is not valid for {}.{} ({:?})",
            meta.name, field.name, field.kind
        ))
    })
}

/// Validate and order the values of a new row.
///
/// Unknown columns, nulls in non-nullable columns and missing required
/// columns are rejected; declared defaults fill absent columns.
pub fn prepare_insert(meta: &EntityMeta, data: &Record) -> Result<Vec<(String, Value)>, DataError> {
    for (name, _) in data.iter() {
        meta.require_field(name)?;
    }
    let mut values = Vec::new();
    for field in meta.fields() {
        match data.get(field.name) {
            Some(value) => {
                let value = coerce_column(meta, field.name, value)?;
                if value.is_null() && !field.nullable && !field.generated {
                    return Err(DataError::configuration(format!(
                        "{}.{} cannot be null",
                        meta.name, field.name
                    )));
                }
                if !(value.is_null() && field.generated) {
                    values.push((field.name.to_string(), value));
                }
            }
            None => {
                if let Some(default) = &field.default {
                    values.push((field.name.to_string(), default.clone()));
                } else if field.is_required() {
                    return Err(DataError::configuration(format!(
                        "missing required field {}.{}",
                        meta.name, field.name
                    )));
                }
            }
        }
    }
    Ok(values)
}

/// Validate update values, applying the set-none policy.
///
/// A null value is accepted only when `update_set_none` is enabled and the
/// column is in `allowed` (or `allowed` is unrestricted).
pub fn prepare_update(
    meta: &EntityMeta,
    data: &Record,
    config: &RepositoryConfig,
    allowed: &AllowedNoneFields,
) -> Result<Vec<(String, Value)>, DataError> {
    let mut values = Vec::with_capacity(data.len());
    for (name, value) in data.iter() {
        let field = meta.require_field(name)?;
        let value = coerce_column(meta, name, value)?;
        if value.is_null() {
            if !config.update_set_none || !allowed.allows(name) {
                return Err(DataError::configuration(format!(
                    "setting {}.{} to null is not allowed",
                    meta.name, name
                )));
            }
            if !field.nullable {
                return Err(DataError::configuration(format!(
                    "{}.{} is not nullable",
                    meta.name, name
                )));
            }
        }
        values.push((name.to_string(), value));
    }
    Ok(values)
}

/// Keep only the values that differ from `current`.
pub fn changed_values(current: &Record, values: Vec<(String, Value)>) -> Vec<(String, Value)> {
    values
        .into_iter()
        .filter(|(name, value)| current.get(name).unwrap_or(&Value::Null) != value)
        .collect()
}
