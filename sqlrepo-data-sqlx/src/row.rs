//! Parameter binding and metadata-driven row decoding for SQLite.

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use sqlrepo_data::entity::{EntityMeta, FieldKind, Record};
use sqlrepo_data::value::Value;
use sqlrepo_data::DataError;

use crate::error::SqlxErrorExt;

/// Build a query with every parameter bound in order.
pub(crate) fn bind_all<'q>(
    sql: &'q str,
    params: &'q [Value],
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>, DataError> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Timestamp(t) => query.bind(*t),
            Value::List(_) => {
                return Err(DataError::configuration("list values cannot be bound as parameters"))
            }
        };
    }
    Ok(query)
}

/// Read the columns of `meta` from a row, by name.
pub(crate) fn decode(meta: &EntityMeta, row: &SqliteRow) -> Result<Record, DataError> {
    let mut record = Record::new();
    for field in meta.fields() {
        let name = field.name;
        let value = match field.kind {
            FieldKind::Integer => row.try_get::<Option<i64>, _>(name).map(Value::from),
            FieldKind::Float => row.try_get::<Option<f64>, _>(name).map(Value::from),
            FieldKind::Text => row.try_get::<Option<String>, _>(name).map(Value::from),
            FieldKind::Boolean => row.try_get::<Option<bool>, _>(name).map(Value::from),
            FieldKind::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(name).map(Value::from),
        }
        .map_err(SqlxErrorExt::into_data_error)?;
        record.set(name, value);
    }
    Ok(record)
}
