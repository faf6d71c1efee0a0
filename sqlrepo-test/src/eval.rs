//! Predicate evaluation and query execution over in-memory tables.
//!
//! Comparisons involving NULL are false (two-valued logic); `IS` tests
//! follow SQL, so `IS NOT TRUE` holds for NULL.

use std::cmp::Ordering;
use std::collections::HashMap;

use sqlrepo_data::entity::{EntityMeta, Record, RelationMeta};
use sqlrepo_data::error::DataError;
use sqlrepo_data::filter::{like_matches, CompareOp, Expr};
use sqlrepo_data::load::{LoadDirective, LoadStrategy};
use sqlrepo_data::query::{CountQuery, Direction, Join, OrderBy, SelectQuery};
use sqlrepo_data::value::Value;

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) rows: Vec<Record>,
    pub(crate) next_id: i64,
}

/// Tables keyed by table name.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    pub(crate) tables: HashMap<&'static str, Table>,
}

impl Store {
    pub(crate) fn rows(&self, meta: &EntityMeta) -> &[Record] {
        self.tables
            .get(meta.table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn table_mut(&mut self, meta: &EntityMeta) -> &mut Table {
        self.tables.entry(meta.table).or_default()
    }
}

pub(crate) fn matches_all(store: &Store, meta: &EntityMeta, row: &Record, exprs: &[Expr]) -> Result<bool, DataError> {
    for expr in exprs {
        if !matches(store, meta, row, expr)? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) fn matches(store: &Store, meta: &EntityMeta, row: &Record, expr: &Expr) -> Result<bool, DataError> {
    let column = |field: &str| row.get(field).unwrap_or(&Value::Null);
    Ok(match expr {
        Expr::Compare { field, op, value } => compare(column(field), *op, value),
        Expr::Between { field, low, high } => {
            let current = column(field);
            compare(current, CompareOp::Ge, low) && compare(current, CompareOp::Le, high)
        }
        Expr::In { field, values } => {
            let current = column(field);
            values.iter().any(|v| compare(current, CompareOp::Eq, v))
        }
        Expr::Is { field, value, negated } => {
            let current = column(field);
            let is = match value {
                Value::Null => current.is_null(),
                other => current == other,
            };
            is != *negated
        }
        Expr::Like {
            field,
            pattern,
            case_insensitive,
        } => match column(field) {
            Value::Text(text) => like_matches(pattern, text, *case_insensitive),
            _ => false,
        },
        Expr::Related { relation, expr } => {
            let relation = meta.relation(relation).ok_or_else(|| DataError::field(meta.name, relation))?;
            let target = relation.target();
            let mut found = false;
            for child in related_rows(store, relation, row) {
                let accepted = match expr {
                    Some(inner) => matches(store, target, child, inner)?,
                    None => true,
                };
                if accepted {
                    found = true;
                    break;
                }
            }
            found
        }
        Expr::And(exprs) => matches_all(store, meta, row, exprs)?,
        Expr::Or(exprs) => {
            let mut any = false;
            for expr in exprs {
                if matches(store, meta, row, expr)? {
                    any = true;
                    break;
                }
            }
            any
        }
        Expr::Not(inner) => !matches(store, meta, row, inner)?,
    })
}

fn compare(current: &Value, op: CompareOp, expected: &Value) -> bool {
    if current.is_null() || expected.is_null() {
        return false;
    }
    let Some(ordering) = current.compare(expected) else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
    }
}

/// Rows of the relation's target joined to `row` on the relation keys.
fn related_rows<'a>(
    store: &'a Store,
    relation: &RelationMeta,
    row: &Record,
) -> impl Iterator<Item = &'a Record> + 'a {
    let key = row.get(relation.local_key).cloned().unwrap_or(Value::Null);
    let remote = relation.remote_key;
    store
        .rows(relation.target())
        .iter()
        .filter(move |child| compare(child.get(remote).unwrap_or(&Value::Null), CompareOp::Eq, &key))
}

/// A base row plus the row each join matched, keyed by join path.
struct Joined<'a> {
    row: &'a Record,
    parts: HashMap<String, &'a Record>,
}

impl Joined<'_> {
    /// `team.name` reads the `team` join; a bare name reads the base row.
    fn value(&self, field: &str) -> &Value {
        let found = match field.rsplit_once('.') {
            Some((path, column)) => self.parts.get(path).and_then(|r| r.get(column)),
            None => self.row.get(field),
        };
        found.unwrap_or(&Value::Null)
    }
}

/// Inner joins of `row`: one entry per combination of joined rows, none
/// when some join finds no row.
fn join_rows<'a>(
    store: &'a Store,
    meta: &'static EntityMeta,
    row: &'a Record,
    joins: &[Join],
) -> Result<Vec<Joined<'a>>, DataError> {
    let mut out = vec![Joined {
        row,
        parts: HashMap::new(),
    }];
    for join in joins {
        let (_, relation) = join.relation(meta)?;
        let key = join.key();
        let parent_key = join.parent_key();
        let mut next = Vec::new();
        for joined in out {
            let parent = if parent_key.is_empty() {
                Some(joined.row)
            } else {
                joined.parts.get(&parent_key).copied()
            };
            let Some(parent) = parent else { continue };
            for child in related_rows(store, relation, parent) {
                let mut parts = joined.parts.clone();
                parts.insert(key.clone(), child);
                next.push(Joined { row, parts });
            }
        }
        out = next;
    }
    Ok(out)
}

/// NULL sorts first in ascending order.
fn order_rows(rows: &mut [Joined<'_>], order_by: &[OrderBy]) {
    rows.sort_by(|a, b| {
        for order in order_by {
            let left = a.value(&order.field);
            let right = b.value(&order.field);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
            };
            let ordering = match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

pub(crate) fn select(store: &Store, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
    let meta = query.entity;
    let mut candidates = Vec::new();
    for row in store.rows(meta) {
        if matches_all(store, meta, row, &query.filters)? {
            candidates.extend(join_rows(store, meta, row, &query.joins)?);
        }
    }
    order_rows(&mut candidates, &query.order_by);
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
    let mut rows: Vec<Record> = candidates
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|joined| joined.row.clone())
        .collect();
    load(store, meta, &mut rows, &query.loads, &[])?;
    Ok(duplicate_joined(meta, rows, &query.loads))
}

/// Counts joined rows, so a to-many join counts a base row once per match.
pub(crate) fn count(store: &Store, query: &CountQuery) -> Result<u64, DataError> {
    let meta = query.entity;
    let mut count = 0;
    for row in store.rows(meta) {
        if matches_all(store, meta, row, &query.filters)? {
            count += join_rows(store, meta, row, &query.joins)?.len() as u64;
        }
    }
    Ok(count)
}

/// Attach the relationships directly under `prefix`, then recurse into the
/// populated ones. Directives below an unpopulated relationship are ignored.
fn load(
    store: &Store,
    meta: &EntityMeta,
    rows: &mut [Record],
    directives: &[LoadDirective],
    prefix: &[String],
) -> Result<(), DataError> {
    for directive in directives {
        if !directive.is_child_of(prefix) || !directive.strategy.populates() {
            continue;
        }
        let name = directive.relation();
        let relation = meta.relation(name).ok_or_else(|| DataError::field(meta.name, name))?;
        let mut path = prefix.to_vec();
        path.push(name.to_string());
        for row in rows.iter_mut() {
            let mut children: Vec<Record> = related_rows(store, relation, row).cloned().collect();
            if !relation.is_collection() {
                children.truncate(1);
            }
            load(store, relation.target(), &mut children, directives, &path)?;
            row.set_related(name, children);
        }
    }
    Ok(())
}

/// A joined to-many load repeats the parent once per child, as a SQL join
/// would.
fn duplicate_joined(meta: &EntityMeta, rows: Vec<Record>, directives: &[LoadDirective]) -> Vec<Record> {
    let joined: Vec<&str> = directives
        .iter()
        .filter(|d| d.depth() == 1 && d.strategy == LoadStrategy::Joined)
        .map(LoadDirective::relation)
        .filter(|name| meta.relation(name).is_some_and(RelationMeta::is_collection))
        .collect();
    if joined.is_empty() {
        return rows;
    }
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let copies = joined
            .iter()
            .map(|name| row.related(name).map_or(0, <[Record]>::len))
            .product::<usize>()
            .max(1);
        for _ in 1..copies {
            out.push(row.clone());
        }
        out.push(row);
    }
    out
}
