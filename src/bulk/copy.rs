//! Server-side bulk copy channel.
//!
//! A [`BulkCopy`] borrows a session's live connection, so whatever transaction is open
//! on that connection covers the transfer. Rows are pulled from a [`RowSource`] and sent
//! without materialising the whole source:
//! - PostgreSQL: `COPY ... FROM STDIN` in text format, flushed in fixed-size chunks
//! - MySQL / SQLite: multi-row parameterised INSERTs, sized under the bind limit

use crate::bulk::cursor::RowSource;
use crate::db::LiveConnection;
use crate::db::TransactionInfo;
use crate::db::params::{push_mysql_value, push_sqlite_value};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SqlValue};
use sqlx::{MySql, MySqlConnection, PgConnection, QueryBuilder, Sqlite, SqliteConnection};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// Default number of rows per INSERT batch.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Flush threshold for COPY data.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Maximum bind parameters in one statement.
const MYSQL_BIND_LIMIT: usize = 65_535;
const SQLITE_BIND_LIMIT: usize = 32_766;

/// Source ordinal to destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_ordinal: usize,
    pub destination: String,
}

pub struct BulkCopy<'c> {
    conn: &'c mut LiveConnection,
    transaction: Option<TransactionInfo>,
    destination: Option<String>,
    mappings: Vec<ColumnMapping>,
    batch_size: usize,
}

impl<'c> BulkCopy<'c> {
    /// Bind a channel to `conn`. `transaction` is the transaction open on it, if any.
    pub fn new(conn: &'c mut LiveConnection, transaction: Option<TransactionInfo>) -> Self {
        Self {
            conn,
            transaction,
            destination: None,
            mappings: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Destination table; may be schema-qualified (`sales.orders`).
    pub fn destination_table(mut self, table: impl Into<String>) -> Self {
        self.destination = Some(table.into());
        self
    }

    pub fn map_column(mut self, source_ordinal: usize, destination: impl Into<String>) -> Self {
        self.mappings.push(ColumnMapping {
            source_ordinal,
            destination: destination.into(),
        });
        self
    }

    /// Rows per INSERT statement. Ignored by the PostgreSQL COPY path.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    pub fn transaction(&self) -> Option<&TransactionInfo> {
        self.transaction.as_ref()
    }

    /// Stream every remaining row of `source` to the destination table.
    ///
    /// Returns the number of rows the server reports as written. Faults from the source or
    /// the server are returned as-is; how much of the transfer persists is governed by the
    /// surrounding transaction.
    pub async fn write_to_server<S>(&mut self, source: &mut S) -> DbResult<u64>
    where
        S: RowSource + ?Sized,
    {
        let destination = self
            .destination
            .as_deref()
            .ok_or_else(|| DbError::invalid_input("Bulk copy destination table is not set"))?;
        if self.mappings.is_empty() {
            return Err(DbError::invalid_input("Bulk copy has no column mappings"));
        }
        let field_count = source.field_count();
        if let Some(mapping) = self
            .mappings
            .iter()
            .find(|mapping| mapping.source_ordinal >= field_count)
        {
            return Err(DbError::invalid_input(format!(
                "Mapping for column '{}' uses source ordinal {} but the source has {} fields",
                mapping.destination, mapping.source_ordinal, field_count
            )));
        }

        let db_type = self.conn.db_type();
        let table = db_type.quote_identifier(destination);
        let columns = self
            .mappings
            .iter()
            .map(|mapping| db_type.quote_identifier(&mapping.destination))
            .collect::<Vec<_>>()
            .join(", ");
        let batch_rows = rows_per_batch(db_type, self.mappings.len(), self.batch_size);
        let mappings = &self.mappings;

        debug!(
            db_type = %db_type,
            table = %destination,
            columns = mappings.len(),
            "Starting bulk copy"
        );

        let rows = crate::impl_db_dispatch!(&mut *self.conn, {
            MySql(c) => {
                let prefix = format!("INSERT INTO {} ({}) ", table, columns);
                insert_mysql(c, &prefix, mappings, batch_rows, source).await?
            },
            Postgres(c) => {
                let statement = format!("COPY {} ({}) FROM STDIN WITH (FORMAT text)", table, columns);
                copy_postgres(c, &statement, mappings, source).await?
            },
            SQLite(c) => {
                let prefix = format!("INSERT INTO {} ({}) ", table, columns);
                insert_sqlite(c, &prefix, mappings, batch_rows, source).await?
            },
        });

        info!(
            table = %destination,
            rows,
            transaction_id = self.transaction.as_ref().map_or("none", |t| t.id.as_str()),
            "Bulk copy completed"
        );
        Ok(rows)
    }
}

fn rows_per_batch(db_type: DatabaseType, columns: usize, batch_size: usize) -> usize {
    let limit = match db_type {
        DatabaseType::MySQL => MYSQL_BIND_LIMIT,
        DatabaseType::SQLite => SQLITE_BIND_LIMIT,
        // COPY streams rows without bind parameters
        DatabaseType::PostgreSQL => return batch_size,
    };
    batch_size.min((limit / columns.max(1)).max(1))
}

/// Advance the source and read the mapped values of the new row.
fn next_row<S>(source: &mut S, mappings: &[ColumnMapping]) -> DbResult<Option<Vec<SqlValue>>>
where
    S: RowSource + ?Sized,
{
    if !source.advance() {
        return Ok(None);
    }
    mappings
        .iter()
        .map(|mapping| source.value_at(mapping.source_ordinal))
        .collect::<DbResult<Vec<_>>>()
        .map(Some)
}

fn read_batch<S>(
    source: &mut S,
    mappings: &[ColumnMapping],
    max_rows: usize,
) -> DbResult<Vec<Vec<SqlValue>>>
where
    S: RowSource + ?Sized,
{
    let mut batch = Vec::with_capacity(max_rows.min(DEFAULT_BATCH_SIZE));
    while batch.len() < max_rows {
        match next_row(source, mappings)? {
            Some(row) => batch.push(row),
            None => break,
        }
    }
    Ok(batch)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

async fn copy_postgres<S>(
    conn: &mut PgConnection,
    statement: &str,
    mappings: &[ColumnMapping],
    source: &mut S,
) -> DbResult<u64>
where
    S: RowSource + ?Sized,
{
    let mut copy = conn.copy_in_raw(statement).await?;
    let mut buffer = String::with_capacity(COPY_CHUNK_BYTES);

    loop {
        let row = match next_row(source, mappings) {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(err) => {
                if let Err(abort_err) = copy.abort(err.to_string()).await {
                    warn!(error = %abort_err, "Failed to abort COPY after source error");
                }
                return Err(err);
            }
        };

        encode_copy_row(&row, &mut buffer);
        if buffer.len() >= COPY_CHUNK_BYTES {
            copy.send(buffer.as_bytes()).await?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        copy.send(buffer.as_bytes()).await?;
    }
    Ok(copy.finish().await?)
}

async fn insert_mysql<S>(
    conn: &mut MySqlConnection,
    prefix: &str,
    mappings: &[ColumnMapping],
    batch_rows: usize,
    source: &mut S,
) -> DbResult<u64>
where
    S: RowSource + ?Sized,
{
    let mut total = 0;
    loop {
        let batch = read_batch(source, mappings, batch_rows)?;
        if batch.is_empty() {
            break;
        }

        let mut builder = QueryBuilder::<MySql>::new(prefix);
        builder.push_values(&batch, |mut row, values| {
            for value in values {
                push_mysql_value(&mut row, value);
            }
        });
        total += builder
            .build()
            .persistent(false)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        if batch.len() < batch_rows {
            break;
        }
    }
    Ok(total)
}

async fn insert_sqlite<S>(
    conn: &mut SqliteConnection,
    prefix: &str,
    mappings: &[ColumnMapping],
    batch_rows: usize,
    source: &mut S,
) -> DbResult<u64>
where
    S: RowSource + ?Sized,
{
    let mut total = 0;
    loop {
        let batch = read_batch(source, mappings, batch_rows)?;
        if batch.is_empty() {
            break;
        }

        let mut builder = QueryBuilder::<Sqlite>::new(prefix);
        builder.push_values(&batch, |mut row, values| {
            for value in values {
                push_sqlite_value(&mut row, value);
            }
        });
        total += builder
            .build()
            .persistent(false)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        if batch.len() < batch_rows {
            break;
        }
    }
    Ok(total)
}

// =============================================================================
// COPY text format
// =============================================================================

fn encode_copy_row(row: &[SqlValue], out: &mut String) {
    for (index, value) in row.iter().enumerate() {
        if index > 0 {
            out.push('\t');
        }
        encode_copy_value(value, out);
    }
    out.push('\n');
}

fn encode_copy_value(value: &SqlValue, out: &mut String) {
    match value {
        SqlValue::Null => out.push_str("\\N"),
        SqlValue::Bool(v) => out.push(if *v { 't' } else { 'f' }),
        SqlValue::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        SqlValue::Float(v) if v.is_nan() => out.push_str("NaN"),
        SqlValue::Float(v) if v.is_infinite() => {
            out.push_str(if *v > 0.0 { "Infinity" } else { "-Infinity" })
        }
        SqlValue::Float(v) => {
            let _ = write!(out, "{}", v);
        }
        SqlValue::String(v) => push_escaped(v, out),
        SqlValue::Bytes(v) => {
            // bytea hex input; the backslash itself is escaped for the text format
            out.push_str("\\\\x");
            for byte in v {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        SqlValue::Timestamp(v) => {
            let _ = write!(out, "{}", v.format("%Y-%m-%d %H:%M:%S%.f"));
        }
        SqlValue::Json(v) => push_escaped(&v.to_string(), out),
    }
}

fn push_escaped(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkTransferCursor, RowReflector};
    use crate::db::{DbConnection, executor};
    use chrono::NaiveDate;

    struct Event {
        id: i64,
        name: String,
        payload: Vec<u8>,
    }

    crate::impl_reflect!(Event { id, name, payload });

    fn events(count: i64) -> Vec<Event> {
        (0..count)
            .map(|id| Event {
                id,
                name: format!("event-{id}"),
                payload: vec![id as u8, 0xff],
            })
            .collect()
    }

    async fn sqlite_with_events_table() -> DbConnection {
        let mut conn = DbConnection::new("sqlite::memory:").unwrap();
        conn.open().await.unwrap();
        executor::execute_raw(
            conn.live_mut().unwrap(),
            "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT NOT NULL, payload BLOB)",
        )
        .await
        .unwrap();
        conn
    }

    #[test]
    fn test_encode_copy_values() {
        let mut out = String::new();
        encode_copy_row(
            &[
                SqlValue::Int(42),
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::String("a\tb\\c\nd".into()),
                SqlValue::Bytes(vec![0xde, 0xad]),
            ],
            &mut out,
        );
        assert_eq!(out, "42\t\\N\tt\ta\\tb\\\\c\\nd\t\\\\xdead\n");
    }

    #[test]
    fn test_encode_copy_floats_and_timestamps() {
        let mut out = String::new();
        encode_copy_value(&SqlValue::Float(f64::NAN), &mut out);
        out.push('|');
        encode_copy_value(&SqlValue::Float(f64::NEG_INFINITY), &mut out);
        out.push('|');
        encode_copy_value(&SqlValue::Float(2.5), &mut out);
        out.push('|');
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        encode_copy_value(&SqlValue::Timestamp(ts), &mut out);
        assert_eq!(out, "NaN|-Infinity|2.5|2024-01-02 03:04:05");
    }

    #[test]
    fn test_rows_per_batch_respects_bind_limit() {
        assert_eq!(rows_per_batch(DatabaseType::SQLite, 3, 1_000), 1_000);
        assert_eq!(rows_per_batch(DatabaseType::SQLite, 100, 1_000), 327);
        assert_eq!(rows_per_batch(DatabaseType::MySQL, 100, 1_000), 655);
        assert_eq!(rows_per_batch(DatabaseType::SQLite, 40_000, 10), 1);
        assert_eq!(rows_per_batch(DatabaseType::PostgreSQL, 40_000, 5_000), 5_000);
    }

    #[tokio::test]
    async fn test_write_to_server_sqlite() {
        let mut conn = sqlite_with_events_table().await;
        let reflector = RowReflector::new();
        let items = events(25);

        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Event>());
        let mut copy = BulkCopy::new(conn.live_mut().unwrap(), None)
            .destination_table("events")
            .map_column(0, "id")
            .map_column(1, "name")
            .map_column(2, "payload")
            .batch_size(10);
        let written = copy.write_to_server(&mut cursor).await.unwrap();
        assert_eq!(written, 25);

        let rows = executor::fetch_rows(
            conn.live_mut().unwrap(),
            "SELECT name FROM events WHERE id = 24",
            &[],
            None,
        )
        .await
        .unwrap();
        let names: Vec<(String,)> = rows.decode().unwrap();
        assert_eq!(names, vec![("event-24".to_string(),)]);
    }

    #[tokio::test]
    async fn test_write_to_server_requires_mappings() {
        let mut conn = sqlite_with_events_table().await;
        let reflector = RowReflector::new();
        let items = events(1);
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Event>());

        let mut copy = BulkCopy::new(conn.live_mut().unwrap(), None).destination_table("events");
        let err = copy.write_to_server(&mut cursor).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_write_to_server_rejects_bad_ordinal() {
        let mut conn = sqlite_with_events_table().await;
        let reflector = RowReflector::new();
        let items = events(1);
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Event>());

        let mut copy = BulkCopy::new(conn.live_mut().unwrap(), None)
            .destination_table("events")
            .map_column(5, "id");
        let err = copy.write_to_server(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("ordinal 5"));
    }

    #[tokio::test]
    async fn test_server_rejection_propagates() {
        let mut conn = sqlite_with_events_table().await;
        let reflector = RowReflector::new();
        let items = events(1);
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Event>());

        let mut copy = BulkCopy::new(conn.live_mut().unwrap(), None)
            .destination_table("missing_table")
            .map_column(0, "id");
        let err = copy.write_to_server(&mut cursor).await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
    }
}
