//! Parameter binding utilities.
//!
//! Binds [`SqlValue`]s to backend-specific query objects, both for dispatched statements
//! (`bind_*_value`) and for the multi-row INSERT batches of the bulk copy channel
//! (`push_*_value`).

use crate::models::SqlValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query_builder::Separated;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a value to a PostgreSQL query.
pub(crate) fn bind_postgres_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Timestamp(v) => query.bind(*v),
        // SQLite doesn't have native JSON type, store as string
        SqlValue::Json(v) => query.bind(v.to_string()),
    }
}

/// Push one value into a MySQL `VALUES (...)` tuple.
pub(crate) fn push_mysql_value(row: &mut Separated<'_, '_, MySql, &'static str>, value: &SqlValue) {
    match value {
        SqlValue::Null => row.push_bind(None::<String>),
        SqlValue::Bool(v) => row.push_bind(*v),
        SqlValue::Int(v) => row.push_bind(*v),
        SqlValue::Float(v) => row.push_bind(*v),
        SqlValue::String(v) => row.push_bind(v.clone()),
        SqlValue::Bytes(v) => row.push_bind(v.clone()),
        SqlValue::Timestamp(v) => row.push_bind(*v),
        SqlValue::Json(v) => row.push_bind(Json(v.clone())),
    };
}

/// Push one value into a SQLite `VALUES (...)` tuple.
pub(crate) fn push_sqlite_value(
    row: &mut Separated<'_, '_, Sqlite, &'static str>,
    value: &SqlValue,
) {
    match value {
        SqlValue::Null => row.push_bind(None::<String>),
        SqlValue::Bool(v) => row.push_bind(*v),
        SqlValue::Int(v) => row.push_bind(*v),
        SqlValue::Float(v) => row.push_bind(*v),
        SqlValue::String(v) => row.push_bind(v.clone()),
        SqlValue::Bytes(v) => row.push_bind(v.clone()),
        SqlValue::Timestamp(v) => row.push_bind(*v),
        SqlValue::Json(v) => row.push_bind(v.to_string()),
    };
}
