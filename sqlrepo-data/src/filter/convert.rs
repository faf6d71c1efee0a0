use super::expr::{escape_like, CompareOp, Expr};
use super::spec::{Clause, FilterSpec};
use super::FilterStrategy;
use crate::entity::{EntityMeta, FieldKind, FieldMeta, RelationMeta};
use crate::error::DataError;
use crate::value::Value;

/// Convert a filter specification into predicates against `meta`.
///
/// The returned predicates are implicitly AND-ed and keep the declaration
/// order of the specification.
pub fn convert(
    meta: &EntityMeta,
    spec: &FilterSpec,
    strategy: FilterStrategy,
) -> Result<Vec<Expr>, DataError> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    match (spec, strategy) {
        (FilterSpec::Raw(exprs), _) => Ok(exprs.clone()),
        (FilterSpec::Mapping(pairs), FilterStrategy::Simple) => pairs
            .iter()
            .map(|(key, value)| simple(meta, key, value))
            .collect(),
        (FilterSpec::Mapping(pairs), FilterStrategy::DjangoLike) => pairs
            .iter()
            .map(|(key, value)| django(meta, key, value))
            .collect(),
        (FilterSpec::Clauses(clauses), FilterStrategy::Advanced) => clauses
            .iter()
            .map(|clause| advanced(meta, clause))
            .collect(),
        (spec, strategy) => Err(DataError::configuration(format!(
            "the {strategy} filter strategy cannot interpret a {} specification",
            spec.kind_name()
        ))),
    }
}

/// Where a path ends after walking its relationship hops.
#[derive(Clone, Copy)]
enum Terminal<'m> {
    Field(&'m FieldMeta),
    Relation(&'m RelationMeta),
}

struct ResolvedPath<'m> {
    hops: Vec<&'m RelationMeta>,
    /// Entity the terminal belongs to.
    owner: &'m EntityMeta,
    terminal: Terminal<'m>,
    /// Lookup suffix left over after the terminal (django-like only).
    lookup: Option<&'m str>,
}

impl ResolvedPath<'_> {
    /// Wrap a predicate built at the terminal's entity into the chain of
    /// relationship hops that leads there.
    fn wrap(&self, expr: Expr) -> Expr {
        self.hops
            .iter()
            .rev()
            .fold(expr, |inner, rel| Expr::related(rel.name, Some(inner)))
    }
}

fn resolve_path<'m>(
    meta: &'m EntityMeta,
    path: &'m str,
    separator: &str,
    allow_lookup: bool,
) -> Result<ResolvedPath<'m>, DataError> {
    let segments: Vec<&str> = path.split(separator).collect();
    let mut owner = meta;
    let mut hops = Vec::new();
    for (idx, segment) in segments.iter().copied().enumerate() {
        let rest = &segments[idx + 1..];
        if let Some(relation) = owner.relation(segment) {
            if rest.is_empty() {
                return Ok(ResolvedPath {
                    hops,
                    owner,
                    terminal: Terminal::Relation(relation),
                    lookup: None,
                });
            }
            // rel__<lookup> applies the lookup to the relationship itself
            if allow_lookup && rest.len() == 1 && is_lookup_only(relation.target(), rest[0]) {
                return Ok(ResolvedPath {
                    hops,
                    owner,
                    terminal: Terminal::Relation(relation),
                    lookup: Some(rest[0]),
                });
            }
            hops.push(relation);
            owner = relation.target();
            continue;
        }
        if let Some(field) = owner.field(segment) {
            return match rest {
                [] => Ok(ResolvedPath {
                    hops,
                    owner,
                    terminal: Terminal::Field(field),
                    lookup: None,
                }),
                [lookup] if allow_lookup => Ok(ResolvedPath {
                    hops,
                    owner,
                    terminal: Terminal::Field(field),
                    lookup: Some(*lookup),
                }),
                [next, ..] => Err(DataError::PathResolution {
                    entity: owner.name.to_string(),
                    path: path.to_string(),
                    segment: next.to_string(),
                }),
            };
        }
        if idx == 0 {
            return Err(DataError::field(owner.name, segment));
        }
        return Err(DataError::PathResolution {
            entity: owner.name.to_string(),
            path: path.to_string(),
            segment: segment.to_string(),
        });
    }
    Err(DataError::configuration(format!("empty filter path '{path}'")))
}

fn is_lookup_only(target: &EntityMeta, segment: &str) -> bool {
    Lookup::parse(segment).is_some() && target.field(segment).is_none() && target.relation(segment).is_none()
}

fn coerce(owner: &EntityMeta, field: &FieldMeta, value: &Value) -> Result<Value, DataError> {
    value.coerce(field.kind).ok_or_else(|| {
        DataError::configuration(format!(
            "value {value} is not valid for {}.{} ({:?})",
            owner.name, field.name, field.kind
        ))
    })
}

fn coerce_all(owner: &EntityMeta, field: &FieldMeta, value: &Value, op: &str) -> Result<Vec<Value>, DataError> {
    let items = value.as_list().ok_or_else(|| {
        DataError::configuration(format!(
            "'{op}' on {}.{} requires a list value, got {}",
            owner.name,
            field.name,
            value.type_name()
        ))
    })?;
    items.iter().map(|item| coerce(owner, field, item)).collect()
}

/// Equality that treats `Null` as `IS NULL`.
fn compare(owner: &EntityMeta, field: &FieldMeta, op: CompareOp, value: &Value) -> Result<Expr, DataError> {
    let value = coerce(owner, field, value)?;
    match (op, value) {
        (CompareOp::Eq, Value::Null) => Ok(Expr::is_null(field.name)),
        (CompareOp::Ne, Value::Null) => Ok(Expr::is_not_null(field.name)),
        (_, Value::Null) => Err(DataError::configuration(format!(
            "cannot order-compare {}.{} with null",
            owner.name, field.name
        ))),
        (op, value) => Ok(Expr::compare(field.name, op, value)),
    }
}

/// Predicate on a relationship terminal: compares the related primary key.
fn relation_compare(relation: &RelationMeta, op: CompareOp, value: &Value) -> Result<Expr, DataError> {
    let target = relation.target();
    match (op, value) {
        (CompareOp::Eq, Value::Null) => Ok(Expr::not(Expr::related(relation.name, None))),
        (CompareOp::Ne, Value::Null) => Ok(Expr::related(relation.name, None)),
        _ => {
            let pk = target.require_primary_key()?;
            let inner = compare(target, pk, op, value)?;
            Ok(Expr::related(relation.name, Some(inner)))
        }
    }
}

fn relation_in(relation: &RelationMeta, value: &Value, op: &str) -> Result<Expr, DataError> {
    let target = relation.target();
    let pk = target.require_primary_key()?;
    let values = coerce_all(target, pk, value, op)?;
    Ok(Expr::related(relation.name, Some(Expr::in_list(pk.name, values))))
}

fn simple(meta: &EntityMeta, key: &str, value: &Value) -> Result<Expr, DataError> {
    let path = resolve_path(meta, key, ".", false)?;
    let expr = match path.terminal {
        Terminal::Field(field) => compare(path.owner, field, CompareOp::Eq, value)?,
        Terminal::Relation(relation) => relation_compare(relation, CompareOp::Eq, value)?,
    };
    Ok(path.wrap(expr))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Compare(CompareOp),
    Is,
    IsNot,
    Between,
    Contains,
    In,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" => Operator::Compare(CompareOp::Eq),
            "!=" | "<>" | "ne" => Operator::Compare(CompareOp::Ne),
            ">" | "gt" => Operator::Compare(CompareOp::Gt),
            "<" | "lt" => Operator::Compare(CompareOp::Lt),
            ">=" | "gte" => Operator::Compare(CompareOp::Ge),
            "<=" | "lte" => Operator::Compare(CompareOp::Le),
            "is" => Operator::Is,
            "is_not" | "is-not" | "isnot" | "is not" => Operator::IsNot,
            "between" => Operator::Between,
            "contains" => Operator::Contains,
            "in" => Operator::In,
            _ => return None,
        })
    }
}

fn advanced(meta: &EntityMeta, clause: &Clause) -> Result<Expr, DataError> {
    let operator = Operator::parse(&clause.operator).ok_or_else(|| {
        DataError::configuration(format!("unknown filter operator '{}'", clause.operator))
    })?;
    let path = resolve_path(meta, &clause.field, ".", false)?;
    let value = &clause.value;
    let expr = match (path.terminal, operator) {
        (Terminal::Field(field), Operator::Compare(op)) => compare(path.owner, field, op, value)?,
        (Terminal::Field(field), Operator::Is | Operator::IsNot) => {
            if !matches!(value, Value::Null | Value::Bool(_)) {
                return Err(DataError::configuration(format!(
                    "'{}' on {} requires null or a boolean, got {}",
                    clause.operator,
                    clause.field,
                    value.type_name()
                )));
            }
            Expr::Is {
                field: field.name.to_string(),
                value: value.clone(),
                negated: operator == Operator::IsNot,
            }
        }
        (Terminal::Field(field), Operator::Between) => between(path.owner, field, value)?,
        (Terminal::Field(field), Operator::In) => {
            Expr::in_list(field.name, coerce_all(path.owner, field, value, "in")?)
        }
        (Terminal::Field(field), Operator::Contains) => {
            if field.kind != FieldKind::Text {
                return Err(DataError::configuration(format!(
                    "'contains' requires a text field or a collection relationship, {}.{} is {:?}",
                    path.owner.name, field.name, field.kind
                )));
            }
            Expr::like(field.name, format!("%{}%", like_operand(field, value)?), false)
        }
        (Terminal::Relation(relation), Operator::Compare(op)) => relation_compare(relation, op, value)?,
        (Terminal::Relation(relation), Operator::Is | Operator::IsNot) if value.is_null() => {
            let exists = Expr::related(relation.name, None);
            if operator == Operator::Is {
                Expr::not(exists)
            } else {
                exists
            }
        }
        (Terminal::Relation(relation), Operator::In) => relation_in(relation, value, "in")?,
        (Terminal::Relation(relation), Operator::Contains) if relation.is_collection() => {
            if value.as_list().is_some() {
                relation_in(relation, value, "contains")?
            } else {
                relation_compare(relation, CompareOp::Eq, value)?
            }
        }
        (Terminal::Relation(relation), _) => {
            return Err(DataError::configuration(format!(
                "operator '{}' is not supported on relationship '{}'",
                clause.operator, relation.name
            )))
        }
    };
    Ok(path.wrap(expr))
}

fn between(owner: &EntityMeta, field: &FieldMeta, value: &Value) -> Result<Expr, DataError> {
    match value.as_list() {
        Some([low, high]) => Ok(Expr::Between {
            field: field.name.to_string(),
            low: coerce(owner, field, low)?,
            high: coerce(owner, field, high)?,
        }),
        Some(items) => Err(DataError::configuration(format!(
            "'between' on {}.{} requires exactly 2 values, got {}",
            owner.name,
            field.name,
            items.len()
        ))),
        None => Err(DataError::configuration(format!(
            "'between' on {}.{} requires a (low, high) pair, got {}",
            owner.name,
            field.name,
            value.type_name()
        ))),
    }
}

fn like_operand(field: &FieldMeta, value: &Value) -> Result<String, DataError> {
    match value {
        Value::Text(s) => Ok(escape_like(s)),
        other => Err(DataError::configuration(format!(
            "pattern lookups on '{}' require a text value, got {}",
            field.name,
            other.type_name()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Range,
    IsNull,
    Ne,
}

impl Lookup {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "in" => Lookup::In,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "range" => Lookup::Range,
            "isnull" => Lookup::IsNull,
            "ne" => Lookup::Ne,
            _ => return None,
        })
    }

    fn compare_op(self) -> Option<CompareOp> {
        match self {
            Lookup::Exact => Some(CompareOp::Eq),
            Lookup::Ne => Some(CompareOp::Ne),
            Lookup::Gt => Some(CompareOp::Gt),
            Lookup::Gte => Some(CompareOp::Ge),
            Lookup::Lt => Some(CompareOp::Lt),
            Lookup::Lte => Some(CompareOp::Le),
            _ => None,
        }
    }

    /// (prefix wildcard, suffix wildcard, case-insensitive)
    fn pattern_shape(self) -> Option<(bool, bool, bool)> {
        match self {
            Lookup::IExact => Some((false, false, true)),
            Lookup::Contains => Some((true, true, false)),
            Lookup::IContains => Some((true, true, true)),
            Lookup::StartsWith => Some((false, true, false)),
            Lookup::IStartsWith => Some((false, true, true)),
            Lookup::EndsWith => Some((true, false, false)),
            Lookup::IEndsWith => Some((true, false, true)),
            _ => None,
        }
    }
}

fn isnull_flag(key: &str, value: &Value) -> Result<bool, DataError> {
    value.as_bool().ok_or_else(|| {
        DataError::configuration(format!("'{key}' requires a boolean, got {}", value.type_name()))
    })
}

fn django(meta: &EntityMeta, key: &str, value: &Value) -> Result<Expr, DataError> {
    let path = resolve_path(meta, key, "__", true)?;
    let lookup = match path.lookup {
        Some(name) => Lookup::parse(name).ok_or_else(|| {
            DataError::configuration(format!("unknown lookup '{name}' in '{key}'"))
        })?,
        None => Lookup::Exact,
    };
    let expr = match path.terminal {
        Terminal::Field(field) => {
            if let Some(op) = lookup.compare_op() {
                compare(path.owner, field, op, value)?
            } else if let Some((prefix, suffix, case_insensitive)) = lookup.pattern_shape() {
                if field.kind != FieldKind::Text {
                    return Err(DataError::configuration(format!(
                        "pattern lookup '{key}' requires a text field, {}.{} is {:?}",
                        path.owner.name, field.name, field.kind
                    )));
                }
                let operand = like_operand(field, value)?;
                let pattern = format!(
                    "{}{operand}{}",
                    if prefix { "%" } else { "" },
                    if suffix { "%" } else { "" }
                );
                Expr::like(field.name, pattern, case_insensitive)
            } else {
                match lookup {
                    Lookup::In => Expr::in_list(field.name, coerce_all(path.owner, field, value, "in")?),
                    Lookup::Range => between(path.owner, field, value)?,
                    Lookup::IsNull => {
                        if isnull_flag(key, value)? {
                            Expr::is_null(field.name)
                        } else {
                            Expr::is_not_null(field.name)
                        }
                    }
                    _ => {
                        return Err(DataError::configuration(format!(
                            "lookup in '{key}' is not supported on field {}",
                            field.name
                        )))
                    }
                }
            }
        }
        Terminal::Relation(relation) => match lookup {
            Lookup::IsNull => {
                let exists = Expr::related(relation.name, None);
                if isnull_flag(key, value)? {
                    Expr::not(exists)
                } else {
                    exists
                }
            }
            Lookup::In => relation_in(relation, value, "in")?,
            other => match other.compare_op() {
                Some(op) => relation_compare(relation, op, value)?,
                None => {
                    return Err(DataError::configuration(format!(
                        "lookup in '{key}' is not supported on relationship '{}'",
                        relation.name
                    )))
                }
            },
        },
    };
    Ok(path.wrap(expr))
}
