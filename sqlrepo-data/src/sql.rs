//! Renders statements into SQL text plus bind values.
//!
//! # Example
//!
//! ```ignore
//! let renderer = SqlRenderer::new(Dialect::Postgres).identifier_policy(IdentifierPolicy::Quote);
//! let stmt = renderer.select(&query)?;
//! // stmt.sql: SELECT "authors"."id" AS "id", ... FROM "authors" WHERE "authors"."name" = $1
//! ```

use std::collections::HashMap;

use crate::entity::EntityMeta;
use crate::error::DataError;
use crate::filter::Expr;
use crate::query::{
    CountQuery, DeleteStatement, Direction, InsertStatement, Join, SelectQuery, UpdateStatement,
};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Generic SQL using `?` placeholders (default).
    Generic,
    /// SQLite-style `?` placeholders.
    Sqlite,
    /// MySQL-style `?` placeholders with backtick quoting.
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Generic | Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }

    /// `LIMIT` clause standing for "no limit" when only an offset is given.
    fn unbounded_limit(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("LIMIT -1"),
            Dialect::MySql => Some("LIMIT 18446744073709551615"),
            Dialect::Generic | Dialect::Postgres => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierPolicy {
    /// Do not validate or quote identifiers.
    Raw,
    /// Validate identifiers against a conservative pattern.
    Validate,
    /// Validate and quote identifiers using the dialect quoting style.
    Quote,
}

/// Rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer {
    dialect: Dialect,
    identifier_policy: IdentifierPolicy,
}

impl Default for SqlRenderer {
    fn default() -> Self {
        Self::new(Dialect::Generic)
    }
}

/// Per-statement rendering state: bind values and sub-select alias counter.
struct Ctx {
    params: Vec<Value>,
    aliases: usize,
}

impl Ctx {
    fn new() -> Self {
        Self {
            params: Vec::new(),
            aliases: 0,
        }
    }
}

impl SqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            identifier_policy: IdentifierPolicy::Quote,
        }
    }

    /// Configure identifier validation/quoting behavior.
    pub fn identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.identifier_policy = policy;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn select(&self, query: &SelectQuery) -> Result<SqlStatement, DataError> {
        let meta = query.entity;
        let table = self.ident(meta.table)?;
        let columns = self.column_list(meta, Some(&table))?;
        let mut ctx = Ctx::new();
        let mut sql = format!("SELECT {columns} FROM {table}");
        let aliases = self.append_joins(&mut sql, meta, &table, &query.joins)?;
        self.append_where(&mut sql, &mut ctx, meta, &table, &query.filters)?;
        if !query.order_by.is_empty() {
            let mut clauses = Vec::with_capacity(query.order_by.len());
            for term in &query.order_by {
                let col = match term.split() {
                    (None, column) => self.column(&table, column)?,
                    (Some(path), column) => {
                        let alias = aliases.get(path).ok_or_else(|| {
                            DataError::configuration(format!(
                                "order term '{}' needs a join on '{path}'",
                                term.field
                            ))
                        })?;
                        self.column(alias, column)?
                    }
                };
                clauses.push(match term.direction {
                    Direction::Asc => format!("{col} ASC"),
                    Direction::Desc => format!("{col} DESC"),
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }
        match (query.limit, query.offset, self.dialect.unbounded_limit()) {
            (Some(limit), _, _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(_), Some(unbounded)) => {
                sql.push(' ');
                sql.push_str(unbounded);
            }
            _ => {}
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(SqlStatement {
            sql,
            params: ctx.params,
        })
    }

    pub fn count(&self, query: &CountQuery) -> Result<SqlStatement, DataError> {
        let table = self.ident(query.entity.table)?;
        let mut ctx = Ctx::new();
        let mut sql = format!("SELECT COUNT(*) FROM {table}");
        self.append_joins(&mut sql, query.entity, &table, &query.joins)?;
        self.append_where(&mut sql, &mut ctx, query.entity, &table, &query.filters)?;
        Ok(SqlStatement {
            sql,
            params: ctx.params,
        })
    }

    /// `INSERT ... RETURNING` every column.
    pub fn insert(&self, stmt: &InsertStatement) -> Result<SqlStatement, DataError> {
        let meta = stmt.entity;
        let table = self.ident(meta.table)?;
        let returning = self.column_list(meta, None)?;
        let mut ctx = Ctx::new();
        let sql = if stmt.values.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES RETURNING {returning}")
        } else {
            let mut columns = Vec::with_capacity(stmt.values.len());
            let mut placeholders = Vec::with_capacity(stmt.values.len());
            for (name, value) in &stmt.values {
                columns.push(self.ident(name)?);
                placeholders.push(self.bind(&mut ctx, value.clone())?);
            }
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING {returning}",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        Ok(SqlStatement {
            sql,
            params: ctx.params,
        })
    }

    /// `UPDATE ... RETURNING` every column.
    pub fn update(&self, stmt: &UpdateStatement) -> Result<SqlStatement, DataError> {
        let meta = stmt.entity;
        if stmt.values.is_empty() {
            return Err(DataError::configuration(format!(
                "update of {} has no values to set",
                meta.name
            )));
        }
        let table = self.ident(meta.table)?;
        let mut ctx = Ctx::new();
        let mut assignments = Vec::with_capacity(stmt.values.len());
        for (name, value) in &stmt.values {
            let col = self.ident(name)?;
            let placeholder = self.bind(&mut ctx, value.clone())?;
            assignments.push(format!("{col} = {placeholder}"));
        }
        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        self.append_where(&mut sql, &mut ctx, meta, &table, &stmt.filters)?;
        sql.push_str(&format!(" RETURNING {}", self.column_list(meta, None)?));
        Ok(SqlStatement {
            sql,
            params: ctx.params,
        })
    }

    pub fn delete(&self, stmt: &DeleteStatement) -> Result<SqlStatement, DataError> {
        let table = self.ident(stmt.entity.table)?;
        let mut ctx = Ctx::new();
        let mut sql = format!("DELETE FROM {table}");
        self.append_where(&mut sql, &mut ctx, stmt.entity, &table, &stmt.filters)?;
        Ok(SqlStatement {
            sql,
            params: ctx.params,
        })
    }

    /// `INNER JOIN` clauses aliased `j1`, `j2`, ...; returns each join's
    /// alias by its dotted key.
    fn append_joins(
        &self,
        sql: &mut String,
        meta: &'static EntityMeta,
        table: &str,
        joins: &[Join],
    ) -> Result<HashMap<String, String>, DataError> {
        let mut aliases: HashMap<String, String> = HashMap::new();
        for (n, join) in joins.iter().enumerate() {
            let (_, relation) = join.relation(meta)?;
            let parent_key = join.parent_key();
            let parent = if parent_key.is_empty() {
                table.to_string()
            } else {
                aliases.get(&parent_key).cloned().ok_or_else(|| {
                    DataError::configuration(format!("join '{}' comes before its parent", join.key()))
                })?
            };
            let alias = self.ident(&format!("j{}", n + 1))?;
            sql.push_str(&format!(
                " INNER JOIN {} AS {alias} ON {} = {}",
                self.ident(relation.target().table)?,
                self.column(&alias, relation.remote_key)?,
                self.column(&parent, relation.local_key)?
            ));
            aliases.insert(join.key(), alias);
        }
        Ok(aliases)
    }

    fn append_where(
        &self,
        sql: &mut String,
        ctx: &mut Ctx,
        meta: &EntityMeta,
        scope: &str,
        filters: &[Expr],
    ) -> Result<(), DataError> {
        if filters.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(filters.len());
        for expr in filters {
            clauses.push(self.expr(ctx, meta, scope, expr)?);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn expr(&self, ctx: &mut Ctx, meta: &EntityMeta, scope: &str, expr: &Expr) -> Result<String, DataError> {
        match expr {
            Expr::Compare { field, op, value } => {
                let col = self.column(scope, field)?;
                let placeholder = self.bind(ctx, value.clone())?;
                Ok(format!("{col} {} {placeholder}", op.as_sql()))
            }
            Expr::Between { field, low, high } => {
                let col = self.column(scope, field)?;
                let low = self.bind(ctx, low.clone())?;
                let high = self.bind(ctx, high.clone())?;
                Ok(format!("{col} BETWEEN {low} AND {high}"))
            }
            Expr::In { field, values } => {
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let col = self.column(scope, field)?;
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    placeholders.push(self.bind(ctx, value.clone())?);
                }
                Ok(format!("{col} IN ({})", placeholders.join(", ")))
            }
            Expr::Is { field, value, negated } => {
                let col = self.column(scope, field)?;
                let not = if *negated { " NOT" } else { "" };
                match value {
                    Value::Null => Ok(format!("{col} IS{not} NULL")),
                    Value::Bool(true) => Ok(format!("{col} IS{not} TRUE")),
                    Value::Bool(false) => Ok(format!("{col} IS{not} FALSE")),
                    other => Err(DataError::configuration(format!(
                        "IS requires null or a boolean, got {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Like {
                field,
                pattern,
                case_insensitive,
            } => {
                let col = self.column(scope, field)?;
                let placeholder = self.bind(ctx, Value::Text(pattern.clone()))?;
                Ok(match (case_insensitive, self.dialect) {
                    (true, Dialect::Postgres) => format!("{col} ILIKE {placeholder} ESCAPE '\\'"),
                    (true, _) => format!("LOWER({col}) LIKE LOWER({placeholder}) ESCAPE '\\'"),
                    (false, _) => format!("{col} LIKE {placeholder} ESCAPE '\\'"),
                })
            }
            Expr::Related { relation, expr } => {
                let rel = meta.relation(relation).ok_or_else(|| {
                    DataError::configuration(format!(
                        "unknown relationship '{relation}' on entity {}",
                        meta.name
                    ))
                })?;
                let target = rel.target();
                ctx.aliases += 1;
                let alias = self.ident(&format!("r{}", ctx.aliases))?;
                let target_table = self.ident(target.table)?;
                let mut sql = format!(
                    "EXISTS (SELECT 1 FROM {target_table} AS {alias} WHERE {} = {}",
                    self.column(&alias, rel.remote_key)?,
                    self.column(scope, rel.local_key)?
                );
                if let Some(inner) = expr {
                    let inner = self.expr(ctx, target, &alias, inner)?;
                    sql.push_str(&format!(" AND {inner}"));
                }
                sql.push(')');
                Ok(sql)
            }
            Expr::And(exprs) => self.join(ctx, meta, scope, exprs, " AND ", "1 = 1"),
            Expr::Or(exprs) => self.join(ctx, meta, scope, exprs, " OR ", "1 = 0"),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.expr(ctx, meta, scope, inner)?)),
        }
    }

    fn join(
        &self,
        ctx: &mut Ctx,
        meta: &EntityMeta,
        scope: &str,
        exprs: &[Expr],
        separator: &str,
        empty: &str,
    ) -> Result<String, DataError> {
        if exprs.is_empty() {
            return Ok(empty.to_string());
        }
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            parts.push(self.expr(ctx, meta, scope, expr)?);
        }
        Ok(format!("({})", parts.join(separator)))
    }

    fn bind(&self, ctx: &mut Ctx, value: Value) -> Result<String, DataError> {
        if let Value::List(_) = value {
            return Err(DataError::configuration(
                "list values can only be bound through IN predicates",
            ));
        }
        ctx.params.push(value);
        Ok(self.dialect.placeholder(ctx.params.len()))
    }

    fn column(&self, scope: &str, field: &str) -> Result<String, DataError> {
        Ok(format!("{scope}.{}", self.ident(field)?))
    }

    /// `"t"."a" AS "a", ...` when qualified, `"a", ...` otherwise.
    fn column_list(&self, meta: &EntityMeta, qualifier: Option<&str>) -> Result<String, DataError> {
        let mut out = Vec::with_capacity(meta.fields().len());
        for name in meta.column_names() {
            let col = self.ident(name)?;
            out.push(match qualifier {
                Some(table) => format!("{table}.{col} AS {col}"),
                None => col,
            });
        }
        Ok(out.join(", "))
    }

    fn ident(&self, ident: &str) -> Result<String, DataError> {
        match self.identifier_policy {
            IdentifierPolicy::Raw => Ok(ident.to_string()),
            IdentifierPolicy::Validate | IdentifierPolicy::Quote if !is_valid_identifier(ident) => {
                Err(DataError::configuration(format!("Invalid identifier: {ident}")))
            }
            IdentifierPolicy::Validate => Ok(ident.to_string()),
            IdentifierPolicy::Quote => {
                let quote = self.dialect.quote_char();
                Ok(format!("{quote}{ident}{quote}"))
            }
        }
    }
}

fn is_valid_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::filter::CompareOp;
    use crate::query::{resolve_joins, OrderBy};
    use crate::testing::{Player, Team};

    fn player_query() -> SelectQuery {
        SelectQuery::new(Player::meta())
    }

    #[test]
    fn test_simple_select() {
        let stmt = SqlRenderer::new(Dialect::Sqlite).select(&SelectQuery::new(Team::meta())).unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT "teams"."id" AS "id", "teams"."name" AS "name", "teams"."league_id" AS "league_id" FROM "teams""#
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_where_order_limit_offset() {
        let mut query = SelectQuery::new(Team::meta());
        query.filters = vec![Expr::eq("name", "Owls"), Expr::compare("id", CompareOp::Gt, 3)];
        query.order_by = vec![OrderBy::desc("name")];
        query.limit = Some(10);
        query.offset = Some(20);
        let stmt = SqlRenderer::new(Dialect::Postgres)
            .identifier_policy(IdentifierPolicy::Raw)
            .select(&query)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT teams.id AS id, teams.name AS name, teams.league_id AS league_id FROM teams \
             WHERE teams.name = $1 AND teams.id > $2 ORDER BY teams.name DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.params, vec![Value::from("Owls"), Value::Int(3)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let mut query = player_query();
        query.offset = Some(5);
        let sqlite = SqlRenderer::new(Dialect::Sqlite).select(&query).unwrap();
        assert!(sqlite.sql.ends_with("LIMIT -1 OFFSET 5"));
        let postgres = SqlRenderer::new(Dialect::Postgres).select(&query).unwrap();
        assert!(postgres.sql.ends_with("FROM \"players\" OFFSET 5"));
    }

    #[test]
    fn test_related_becomes_exists() {
        let mut query = player_query();
        query.filters = vec![Expr::related(
            "team",
            Some(Expr::related("league", Some(Expr::eq("name", "Premier")))),
        )];
        let stmt = SqlRenderer::new(Dialect::Sqlite).count(&CountQuery {
            entity: query.entity,
            filters: query.filters,
            joins: Vec::new(),
        })
        .unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT COUNT(*) FROM "players" WHERE EXISTS (SELECT 1 FROM "teams" AS "r1" WHERE "r1"."id" = "players"."team_id" AND EXISTS (SELECT 1 FROM "leagues" AS "r2" WHERE "r2"."id" = "r1"."league_id" AND "r2"."name" = ?))"#
        );
        assert_eq!(stmt.params, vec![Value::from("Premier")]);
    }

    #[test]
    fn test_joins_chain_aliases_and_order_joined_columns() {
        let mut query = player_query();
        query.joins = resolve_joins(Player::meta(), &["team.league".to_string()]).unwrap();
        query.filters = vec![Expr::eq("active", true)];
        query.order_by = vec![OrderBy::asc("team.league.name"), OrderBy::desc("name")];
        let stmt = SqlRenderer::new(Dialect::Sqlite).select(&query).unwrap();
        assert!(stmt.sql.contains(
            r#"FROM "players" INNER JOIN "teams" AS "j1" ON "j1"."id" = "players"."team_id" INNER JOIN "leagues" AS "j2" ON "j2"."id" = "j1"."league_id" WHERE "players"."active" = ?"#
        ));
        assert!(stmt.sql.ends_with(r#"ORDER BY "j2"."name" ASC, "players"."name" DESC"#));

        let count = SqlRenderer::new(Dialect::Sqlite)
            .count(&CountQuery {
                entity: Player::meta(),
                filters: vec![],
                joins: query.joins.clone(),
            })
            .unwrap();
        assert_eq!(
            count.sql,
            r#"SELECT COUNT(*) FROM "players" INNER JOIN "teams" AS "j1" ON "j1"."id" = "players"."team_id" INNER JOIN "leagues" AS "j2" ON "j2"."id" = "j1"."league_id""#
        );

        query.joins.clear();
        let err = SqlRenderer::new(Dialect::Sqlite).select(&query).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_like_is_and_in() {
        let stmt = SqlRenderer::new(Dialect::Sqlite)
            .delete(&DeleteStatement {
                entity: Player::meta(),
                filters: vec![
                    Expr::like("name", "%an%", true),
                    Expr::Is { field: "active".into(), value: Value::Bool(true), negated: true },
                    Expr::in_list("id", vec![Value::Int(1), Value::Int(2)]),
                    Expr::in_list("id", vec![]),
                    Expr::not(Expr::or(vec![Expr::is_null("team_id")])),
                ],
            })
            .unwrap();
        assert_eq!(
            stmt.sql,
            r#"DELETE FROM "players" WHERE LOWER("players"."name") LIKE LOWER(?) ESCAPE '\' AND "players"."active" IS NOT TRUE AND "players"."id" IN (?, ?) AND 1 = 0 AND NOT (("players"."team_id" IS NULL))"#
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_insert_and_update_returning() {
        let renderer = SqlRenderer::new(Dialect::Postgres);
        let insert = renderer
            .insert(&InsertStatement {
                entity: Team::meta(),
                values: vec![("name".into(), Value::from("Owls"))],
            })
            .unwrap();
        assert_eq!(
            insert.sql,
            r#"INSERT INTO "teams" ("name") VALUES ($1) RETURNING "id", "name", "league_id""#
        );

        let update = renderer
            .update(&UpdateStatement {
                entity: Team::meta(),
                filters: vec![Expr::eq("id", 4)],
                values: vec![("name".into(), Value::from("Hawks"))],
            })
            .unwrap();
        assert_eq!(
            update.sql,
            r#"UPDATE "teams" SET "name" = $1 WHERE "teams"."id" = $2 RETURNING "id", "name", "league_id""#
        );
        assert_eq!(update.params, vec![Value::from("Hawks"), Value::Int(4)]);

        let empty = renderer.insert(&InsertStatement { entity: Team::meta(), values: vec![] }).unwrap();
        assert!(empty.sql.contains("DEFAULT VALUES"));
    }

    #[test]
    fn test_invalid_identifier() {
        let mut query = player_query();
        query.filters = vec![Expr::eq("name; drop table players", 1)];
        let err = SqlRenderer::new(Dialect::Sqlite).select(&query).unwrap_err();
        assert!(err.is_configuration());
    }
}
