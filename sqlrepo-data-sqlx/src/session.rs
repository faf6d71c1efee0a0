//! [`AsyncSession`] over a SQLite pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use sqlx::sqlite::SqliteConnection;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use sqlrepo_data::entity::{EntityMeta, Record};
use sqlrepo_data::filter::Expr;
use sqlrepo_data::load::LoadDirective;
use sqlrepo_data::query::{CountQuery, DeleteStatement, InsertStatement, OrderBy, SelectQuery, UpdateStatement};
use sqlrepo_data::session::{AsyncSession, AsyncSessionFactory};
use sqlrepo_data::sql::{Dialect, IdentifierPolicy, SqlRenderer, SqlStatement};
use sqlrepo_data::value::Value;
use sqlrepo_data::DataError;

use crate::error::SqlxErrorExt;
use crate::pool::HasPool;
use crate::row;

/// Session holding at most one open transaction on a pooled connection.
///
/// The transaction begins with the first statement and ends on `commit` or
/// `rollback`. Dropping the session drops the transaction, which rolls it
/// back.
///
/// Every populating load strategy is served by one batched `IN` query per
/// relationship level, so joined loads never repeat parent rows.
pub struct SqlxSession {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
    renderer: SqlRenderer,
    closed: bool,
}

impl SqlxSession {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx: None,
            renderer: SqlRenderer::new(Dialect::Sqlite).identifier_policy(IdentifierPolicy::Quote),
            closed: false,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn conn(&mut self) -> Result<&mut SqliteConnection, DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        if self.tx.is_none() {
            let tx = self.pool.begin().await.map_err(SqlxErrorExt::into_data_error)?;
            tracing::debug!("Transaction started");
            self.tx = Some(tx);
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DataError::SessionClosed),
        }
    }
}

async fn fetch_rows(
    conn: &mut SqliteConnection,
    meta: &EntityMeta,
    stmt: &SqlStatement,
) -> Result<Vec<Record>, DataError> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");
    let rows = row::bind_all(&stmt.sql, &stmt.params)?
        .fetch_all(&mut *conn)
        .await
        .map_err(SqlxErrorExt::into_data_error)?;
    rows.iter().map(|r| row::decode(meta, r)).collect()
}

/// Attach the relationships named by `directives` below `prefix`.
fn load<'a>(
    conn: &'a mut SqliteConnection,
    renderer: SqlRenderer,
    meta: &'static EntityMeta,
    rows: &'a mut [Record],
    directives: &'a [LoadDirective],
    prefix: Vec<String>,
) -> Pin<Box<dyn Future<Output = Result<(), DataError>> + Send + 'a>> {
    Box::pin(async move {
        for directive in directives {
            if !directive.is_child_of(&prefix) || !directive.strategy.populates() {
                continue;
            }
            let name = directive.relation();
            let relation = meta.relation(name).ok_or_else(|| DataError::field(meta.name, name))?;
            let target = relation.target();

            let mut keys: Vec<Value> = Vec::new();
            for parent in rows.iter() {
                if let Some(key) = parent.get(relation.local_key).filter(|v| !v.is_null()) {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }

            let mut children = if keys.is_empty() {
                Vec::new()
            } else {
                let mut query = SelectQuery::new(target);
                query.filters.push(Expr::in_list(relation.remote_key, keys));
                if let Some(pk) = target.primary_key() {
                    query.order_by.push(OrderBy::asc(pk.name));
                }
                let stmt = renderer.select(&query)?;
                fetch_rows(&mut *conn, target, &stmt).await?
            };

            let mut path = prefix.clone();
            path.push(name.to_string());
            load(&mut *conn, renderer, target, &mut children, directives, path).await?;

            let mut by_key: HashMap<String, Vec<Record>> = HashMap::new();
            for child in children {
                let key = child.get(relation.remote_key).map(Value::to_string).unwrap_or_default();
                by_key.entry(key).or_default().push(child);
            }
            for parent in rows.iter_mut() {
                let mut related = match parent.get(relation.local_key).filter(|v| !v.is_null()) {
                    Some(key) => by_key.get(&key.to_string()).cloned().unwrap_or_default(),
                    None => Vec::new(),
                };
                if !relation.is_collection() {
                    related.truncate(1);
                }
                parent.set_related(name, related);
            }
        }
        Ok(())
    })
}

impl AsyncSession for SqlxSession {
    async fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
        let renderer = self.renderer;
        let stmt = renderer.select(query)?;
        let conn = self.conn().await?;
        let mut rows = fetch_rows(&mut *conn, query.entity, &stmt).await?;
        load(conn, renderer, query.entity, &mut rows, &query.loads, Vec::new()).await?;
        Ok(rows)
    }

    async fn count(&mut self, query: &CountQuery) -> Result<u64, DataError> {
        let stmt = self.renderer.count(query)?;
        let conn = self.conn().await?;
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");
        let row = row::bind_all(&stmt.sql, &stmt.params)?
            .fetch_one(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        let count: i64 = row.try_get(0).map_err(SqlxErrorExt::into_data_error)?;
        Ok(count.max(0) as u64)
    }

    async fn add(&mut self, stmt: &InsertStatement) -> Result<Record, DataError> {
        let sql = self.renderer.insert(stmt)?;
        let conn = self.conn().await?;
        let mut rows = fetch_rows(conn, stmt.entity, &sql).await?;
        rows.pop()
            .ok_or_else(|| DataError::Other(format!("insert into {} returned no row", stmt.entity.table)))
    }

    async fn update(&mut self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError> {
        let sql = self.renderer.update(stmt)?;
        let conn = self.conn().await?;
        fetch_rows(conn, stmt.entity, &sql).await
    }

    async fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, DataError> {
        let sql = self.renderer.delete(stmt)?;
        let conn = self.conn().await?;
        tracing::debug!(sql = %sql.sql, params = sql.params.len(), "Executing statement");
        let result = row::bind_all(&sql.sql, &sql.params)?
            .execute(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        Ok(result.rows_affected())
    }

    /// Statements already run on the transaction's connection, so there is
    /// nothing buffered to send.
    async fn flush(&mut self) -> Result<(), DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(SqlxErrorExt::into_data_error)?;
            tracing::debug!("Transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(SqlxErrorExt::into_data_error)?;
            tracing::debug!("Transaction rolled back");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DataError> {
        let result = self.rollback().await;
        self.closed = true;
        result
    }
}

/// Opens a [`SqlxSession`] per unit of work.
#[derive(Clone)]
pub struct SqlxSessionFactory {
    pool: SqlitePool,
}

impl SqlxSessionFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Build a factory from any application state exposing a pool.
    pub fn from_state<S: HasPool<Sqlite>>(state: &S) -> Self {
        Self::new(state.pool().clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl AsyncSessionFactory for SqlxSessionFactory {
    type Session = SqlxSession;

    async fn open(&self) -> Result<SqlxSession, DataError> {
        Ok(SqlxSession::new(self.pool.clone()))
    }
}
