//! Statement execution on a live connection.
//!
//! Each backend has a submodule with the same three functions (`fetch_rows`,
//! `execute`, `execute_raw`); the top-level functions dispatch on the connection.
//! Statements always run on the session's single connection, so whatever transaction
//! is open on it applies.
//!
//! Typed decoding goes through [`Record`], which is simply "implements `sqlx::FromRow`
//! for every backend row type". `#[derive(sqlx::FromRow)]` types satisfy it as long as
//! every field type is supported by all three backends.

use crate::db::connection::LiveConnection;
use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use futures_util::StreamExt;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use tracing::debug;

/// A type decodable from a result row of any supported backend.
pub trait Record:
    for<'r> FromRow<'r, MySqlRow>
    + for<'r> FromRow<'r, PgRow>
    + for<'r> FromRow<'r, SqliteRow>
    + Send
    + Unpin
{
}

impl<T> Record for T where
    T: for<'r> FromRow<'r, MySqlRow>
        + for<'r> FromRow<'r, PgRow>
        + for<'r> FromRow<'r, SqliteRow>
        + Send
        + Unpin
{
}

/// Rows fetched from one of the backends, not yet decoded.
pub enum RowSet {
    MySql(Vec<MySqlRow>),
    Postgres(Vec<PgRow>),
    SQLite(Vec<SqliteRow>),
}

impl RowSet {
    pub fn len(&self) -> usize {
        match self {
            RowSet::MySql(rows) => rows.len(),
            RowSet::Postgres(rows) => rows.len(),
            RowSet::SQLite(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode every row as `T`.
    pub fn decode<T: Record>(&self) -> DbResult<Vec<T>> {
        match self {
            RowSet::MySql(rows) => decode_rows(rows),
            RowSet::Postgres(rows) => decode_rows(rows),
            RowSet::SQLite(rows) => decode_rows(rows),
        }
    }

    /// Decode every row as `A` and `B` and merge the pair.
    pub fn decode_join<A, B, R, F>(&self, merge: F) -> DbResult<Vec<R>>
    where
        A: Record,
        B: Record,
        F: FnMut(A, B) -> R,
    {
        match self {
            RowSet::MySql(rows) => decode_join_rows(rows, merge),
            RowSet::Postgres(rows) => decode_join_rows(rows, merge),
            RowSet::SQLite(rows) => decode_join_rows(rows, merge),
        }
    }

    /// Decode every row as `A`, `B` and `C` and merge the triple.
    pub fn decode_join3<A, B, C, R, F>(&self, merge: F) -> DbResult<Vec<R>>
    where
        A: Record,
        B: Record,
        C: Record,
        F: FnMut(A, B, C) -> R,
    {
        match self {
            RowSet::MySql(rows) => decode_join3_rows(rows, merge),
            RowSet::Postgres(rows) => decode_join3_rows(rows, merge),
            RowSet::SQLite(rows) => decode_join3_rows(rows, merge),
        }
    }
}

fn decode_rows<R, T>(rows: &[R]) -> DbResult<Vec<T>>
where
    R: Row,
    T: for<'r> FromRow<'r, R>,
{
    rows.iter()
        .map(|row| T::from_row(row).map_err(DbError::from))
        .collect()
}

fn decode_join_rows<R, A, B, T, F>(rows: &[R], mut merge: F) -> DbResult<Vec<T>>
where
    R: Row,
    A: for<'r> FromRow<'r, R>,
    B: for<'r> FromRow<'r, R>,
    F: FnMut(A, B) -> T,
{
    rows.iter()
        .map(|row| -> DbResult<T> { Ok(merge(A::from_row(row)?, B::from_row(row)?)) })
        .collect()
}

fn decode_join3_rows<R, A, B, C, T, F>(rows: &[R], mut merge: F) -> DbResult<Vec<T>>
where
    R: Row,
    A: for<'r> FromRow<'r, R>,
    B: for<'r> FromRow<'r, R>,
    C: for<'r> FromRow<'r, R>,
    F: FnMut(A, B, C) -> T,
{
    rows.iter()
        .map(|row| -> DbResult<T> {
            Ok(merge(A::from_row(row)?, B::from_row(row)?, C::from_row(row)?))
        })
        .collect()
}

/// Fetch up to `limit` rows (all rows when `None`).
pub async fn fetch_rows(
    conn: &mut LiveConnection,
    sql: &str,
    params: &[SqlValue],
    limit: Option<usize>,
) -> DbResult<RowSet> {
    let limit = limit.unwrap_or(usize::MAX);
    debug!(sql = %sql, params = params.len(), "Fetching rows");

    let rows = impl_db_dispatch!(conn, {
        MySql(c) => RowSet::MySql(mysql::fetch_rows(c, sql, params, limit).await?),
        Postgres(c) => RowSet::Postgres(postgres::fetch_rows(c, sql, params, limit).await?),
        SQLite(c) => RowSet::SQLite(sqlite::fetch_rows(c, sql, params, limit).await?),
    });
    Ok(rows)
}

/// Execute a statement and return the number of affected rows.
pub async fn execute(conn: &mut LiveConnection, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
    debug!(sql = %sql, params = params.len(), "Executing statement");

    impl_db_dispatch!(conn, {
        MySql(c) => mysql::execute(c, sql, params).await,
        Postgres(c) => postgres::execute(c, sql, params).await,
        SQLite(c) => sqlite::execute(c, sql, params).await,
    })
}

/// Execute an unparameterised control statement (BEGIN, COMMIT, ...).
pub async fn execute_raw(conn: &mut LiveConnection, sql: &str) -> DbResult<()> {
    impl_db_dispatch!(conn, {
        MySql(c) => mysql::execute(c, sql, &[]).await.map(|_| ()),
        Postgres(c) => postgres::execute(c, sql, &[]).await.map(|_| ()),
        SQLite(c) => sqlite::execute(c, sql, &[]).await.map(|_| ()),
    })
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_value;
    use sqlx::MySqlConnection;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
        limit: usize,
    ) -> DbResult<Vec<MySqlRow>> {
        // When params is empty, use raw SQL to avoid prepared statement issues
        let results = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).fetch(sql).take(limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_value(query, param);
            }
            query.fetch(&mut *conn).take(limit).collect::<Vec<_>>().await
        };
        collect_rows(results)
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<u64> {
        // Some statements (transaction control, CREATE PROCEDURE) cannot be prepared
        let result = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_value(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_value;
    use sqlx::PgConnection;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
        limit: usize,
    ) -> DbResult<Vec<PgRow>> {
        let results = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).fetch(sql).take(limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_value(query, param);
            }
            query.fetch(&mut *conn).take(limit).collect::<Vec<_>>().await
        };
        collect_rows(results)
    }

    pub async fn execute(conn: &mut PgConnection, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_value(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_value;
    use sqlx::SqliteConnection;

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
        limit: usize,
    ) -> DbResult<Vec<SqliteRow>> {
        let results = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).fetch(sql).take(limit).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_value(query, param);
            }
            query.fetch(&mut *conn).take(limit).collect::<Vec<_>>().await
        };
        collect_rows(results)
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_value(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(result.rows_affected())
    }
}
