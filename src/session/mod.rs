//! Session and transaction lifecycle.
//!
//! A [`Session`] exclusively owns one logical context ([`DbContext`]) and, through it,
//! one physical connection. It tracks at most one transaction, dispatches statements on
//! its connection (so they join the open transaction, if any) and feeds the bulk copy
//! channel.
//!
//! Disposal comes in two forms:
//! - `dispose().await` resolves the transaction (rolling back anything uncommitted),
//!   then closes the connection; both steps always run
//! - `Drop` cannot do I/O; the connection is dropped and the server rolls back whatever
//!   was still open. That includes a commit queued by a completed scope guard that was
//!   dropped without `dispose().await`: if the session is dropped before its next
//!   operation, the queued commit is lost

mod context;
mod scoped;
mod tap;

pub use context::{DbContext, ModelContext};
pub use scoped::ScopedTransaction;
pub use tap::{DiagnosticTap, TracingTap};

use crate::bulk::{
    BulkCopy, BulkTransferCursor, DEFAULT_BATCH_SIZE, Reflect, RowReflector, StagingTable,
    TableProjector,
};
use crate::config::SessionSettings;
use crate::db::executor::{self, Record, RowSet};
use crate::db::{IsolationLevel, LiveConnection, Outcome, TransactionInfo, TransactionState};
use crate::error::{DbError, DbResult};
use crate::models::{ModelCatalog, SqlValue};
use std::any::type_name;
use std::borrow::Borrow;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One connection, one context, at most one transaction.
///
/// Not safe for concurrent use: every operation takes `&mut self`. Use one session per
/// logical unit of work.
pub struct Session<C: DbContext = ModelContext> {
    context: Option<C>,
    transaction: TransactionState,
    tap: Option<Arc<dyn DiagnosticTap>>,
    reflector: Arc<RowReflector>,
    bulk_batch_size: usize,
}

impl Session<ModelContext> {
    /// Connect with [`ModelContext`] using `settings`.
    pub async fn connect(settings: &SessionSettings, model: Arc<ModelCatalog>) -> DbResult<Self> {
        let url = settings.connection_url().map_err(DbError::invalid_input)?;
        let session = Self::new(
            ModelContext::factory(model),
            &url,
            settings.diagnostics_enabled(),
        )
        .await?;
        Ok(session.with_bulk_batch_size(settings.bulk_batch_size.unwrap_or(DEFAULT_BATCH_SIZE)))
    }
}

impl<C: DbContext> Session<C> {
    /// Build the context through `factory` and open its connection.
    ///
    /// When `diagnostics_enabled` is set the [`TracingTap`] is installed. On failure
    /// nothing is retained; the partially built context is dropped.
    pub async fn new<F>(
        factory: F,
        connection_string: &str,
        diagnostics_enabled: bool,
    ) -> DbResult<Self>
    where
        F: FnOnce(&str, bool) -> DbResult<C>,
    {
        let mut context = factory(connection_string, diagnostics_enabled)?;
        context.connection_mut().open().await?;

        let tap: Option<Arc<dyn DiagnosticTap>> = if diagnostics_enabled {
            Some(Arc::new(TracingTap))
        } else {
            None
        };

        Ok(Self {
            context: Some(context),
            transaction: TransactionState::NotStarted,
            tap,
            reflector: Arc::new(RowReflector::new()),
            bulk_batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Replace the diagnostic tap.
    pub fn with_tap<T: DiagnosticTap + 'static>(mut self, tap: T) -> Self {
        self.tap = Some(Arc::new(tap));
        self
    }

    /// Remove the diagnostic tap.
    pub fn without_tap(mut self) -> Self {
        self.tap = None;
        self
    }

    /// Share a reflector (and its per-type cache) with other sessions.
    pub fn with_reflector(mut self, reflector: Arc<RowReflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_bulk_batch_size(mut self, rows: usize) -> Self {
        self.bulk_batch_size = rows.max(1);
        self
    }

    pub fn reflector(&self) -> &Arc<RowReflector> {
        &self.reflector
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Derived from the connection; never cached.
    pub fn is_open(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|context| context.connection().is_open())
    }

    /// Whether the context has been disposed by `close_connection`.
    pub fn is_closed(&self) -> bool {
        self.context.is_none()
    }

    pub fn context(&self) -> DbResult<&C> {
        self.context
            .as_ref()
            .ok_or_else(|| DbError::object_disposed("session context"))
    }

    pub fn context_mut(&mut self) -> DbResult<&mut C> {
        self.context
            .as_mut()
            .ok_or_else(|| DbError::object_disposed("session context"))
    }

    /// Open the connection. No-op when already open.
    pub async fn open_connection(&mut self) -> DbResult<()> {
        self.context_mut()?.connection_mut().open().await
    }

    /// Close the connection and dispose the context. No-op when already closed.
    ///
    /// A resolution queued by a dropped scope guard is sent first. A transaction that is
    /// still active is abandoned to the server, which rolls it back when the connection
    /// goes away, and is tracked as orphaned. The connection is closed even when the
    /// queued resolution fails; the first error is returned.
    pub async fn close_connection(&mut self) -> DbResult<()> {
        if self.context.is_none() {
            debug!("Session already closed");
            return Ok(());
        }
        let flushed = self.flush_pending().await;

        let Some(mut context) = self.context.take() else {
            return flushed;
        };

        if self.transaction.is_unresolved() {
            if let Some(info) = self.transaction.info() {
                warn!(
                    transaction_id = %info.id,
                    "Closing connection with an unresolved transaction"
                );
            }
            self.transaction.orphan();
        }

        context.use_transaction(None);
        let closed = context.connection_mut().close().await;
        flushed.and(closed)
    }

    /// Resolve the transaction, then close the connection.
    ///
    /// Both steps run even when the first fails; the first error is returned.
    pub async fn dispose(mut self) -> DbResult<()> {
        let released = self.release_transaction().await;
        let closed = self.close_connection().await;
        released.and(closed)
    }

    /// Query the server version string.
    pub async fn server_version(&mut self) -> DbResult<String> {
        self.flush_pending().await?;
        self.context_mut()?.connection_mut().server_version().await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction and bind the context to it.
    ///
    /// A transaction still active on this session is rolled back first.
    pub async fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> DbResult<TransactionInfo> {
        self.flush_pending().await?;

        if let Some(stale) = self.valid_transaction().cloned() {
            warn!(
                transaction_id = %stale.id,
                "Beginning a new transaction while another is active; rolling back the previous one"
            );
            self.resolve(stale, Outcome::RolledBack).await?;
        }

        let live = self.live()?;
        for statement in isolation.begin_statements(live.db_type()) {
            executor::execute_raw(live, &statement).await?;
        }

        let info = TransactionInfo::new(isolation);
        info!(
            transaction_id = %info.id,
            isolation = %isolation,
            "Transaction started"
        );
        self.transaction = TransactionState::Active(info.clone());
        self.context_mut()?.use_transaction(Some(&info));
        Ok(info)
    }

    /// Begin a transaction resolved when the returned guard is disposed.
    pub async fn begin_scoped_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> DbResult<ScopedTransaction<'_, C>> {
        let info = self.begin_transaction(isolation).await?;
        Ok(ScopedTransaction::new(self, info))
    }

    /// Commit the current transaction. No-op when there is no valid transaction.
    ///
    /// The committed transaction stays tracked (as resolved) but is inert.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.flush_pending().await?;
        match self.valid_transaction().cloned() {
            Some(info) => self.resolve(info, Outcome::Committed).await,
            None => {
                self.skip_resolution("commit");
                Ok(())
            }
        }
    }

    /// Roll back the current transaction. No-op when there is no valid transaction.
    pub async fn rollback_if_uncommitted(&mut self) -> DbResult<()> {
        self.flush_pending().await?;
        match self.valid_transaction().cloned() {
            Some(info) => self.resolve(info, Outcome::RolledBack).await,
            None => {
                self.skip_resolution("rollback");
                Ok(())
            }
        }
    }

    /// The transaction statements currently run in, if any.
    pub fn transaction(&self) -> Option<&TransactionInfo> {
        self.valid_transaction()
    }

    pub fn transaction_state(&self) -> &TransactionState {
        &self.transaction
    }

    fn valid_transaction(&self) -> Option<&TransactionInfo> {
        if self.is_open() {
            self.transaction.active()
        } else {
            None
        }
    }

    /// Queue the resolution of the active transaction `id`; sent before the next operation.
    pub(crate) fn defer_resolution(&mut self, id: &str, outcome: Outcome) {
        if self.transaction.defer(id, outcome) {
            debug!(transaction_id = %id, %outcome, "Transaction resolution deferred");
        }
    }

    async fn flush_pending(&mut self) -> DbResult<()> {
        let Some((info, outcome)) = self.transaction.take_pending() else {
            return Ok(());
        };

        if !self.is_open() {
            debug!(transaction_id = %info.id, "Deferred resolution dropped; connection is gone");
            self.transaction = TransactionState::Orphaned(info);
            return Ok(());
        }

        debug!(transaction_id = %info.id, %outcome, "Applying deferred resolution");
        self.resolve(info, outcome).await
    }

    async fn release_transaction(&mut self) -> DbResult<()> {
        let flushed = self.flush_pending().await;
        let rolled_back = self.rollback_if_uncommitted().await;
        flushed.and(rolled_back)
    }

    async fn resolve(&mut self, info: TransactionInfo, outcome: Outcome) -> DbResult<()> {
        let result = match self.live() {
            Ok(live) => executor::execute_raw(live, outcome.statement())
                .await
                .map_err(|err| {
                    DbError::transaction(
                        format!("{} failed: {}", outcome.statement(), err),
                        &info.id,
                    )
                }),
            Err(err) => Err(err),
        };
        if let Some(context) = self.context.as_mut() {
            context.use_transaction(None);
        }

        match result {
            Ok(()) => {
                info!(transaction_id = %info.id, %outcome, "Transaction resolved");
                self.transaction = TransactionState::Resolved { info, outcome };
                Ok(())
            }
            Err(err) => {
                warn!(transaction_id = %info.id, error = %err, "Failed to resolve transaction");
                self.transaction = TransactionState::Orphaned(info);
                Err(err)
            }
        }
    }

    fn skip_resolution(&mut self, action: &str) {
        if !self.is_open() && self.transaction.is_active() {
            self.transaction.orphan();
        }
        debug!(
            action,
            state = ?self.transaction,
            "No valid transaction; nothing to resolve"
        );
    }

    // =========================================================================
    // Query dispatch
    // =========================================================================

    /// All rows, decoded as `T`.
    pub async fn select<T: Record>(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<T>> {
        self.fetch("select", sql, params, None).await?.decode()
    }

    /// The first row. Fails when there is none.
    pub async fn select_first<T: Record>(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<T> {
        self.fetch("select_first", sql, params, Some(1))
            .await?
            .decode()?
            .into_iter()
            .next()
            .ok_or_else(no_elements)
    }

    /// The first row, or `None`.
    pub async fn select_first_or_default<T: Record>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<T>> {
        Ok(self
            .fetch("select_first_or_default", sql, params, Some(1))
            .await?
            .decode()?
            .into_iter()
            .next())
    }

    /// Exactly one row. Fails on zero or several rows.
    pub async fn select_single<T: Record>(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<T> {
        let rows = self.fetch("select_single", sql, params, Some(2)).await?;
        single(rows.decode()?)?.ok_or_else(no_elements)
    }

    /// Zero or one row. Fails on several rows.
    pub async fn select_single_or_default<T: Record>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<T>> {
        let rows = self
            .fetch("select_single_or_default", sql, params, Some(2))
            .await?;
        single(rows.decode()?)
    }

    /// Each row decoded as `A` and `B`, merged by `merge`.
    pub async fn select_join<A, B, R, F>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        merge: F,
    ) -> DbResult<Vec<R>>
    where
        A: Record,
        B: Record,
        F: FnMut(A, B) -> R,
    {
        self.fetch("select_join", sql, params, None)
            .await?
            .decode_join(merge)
    }

    /// Each row decoded as `A`, `B` and `D`, merged by `merge`.
    pub async fn select_join3<A, B, D, R, F>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        merge: F,
    ) -> DbResult<Vec<R>>
    where
        A: Record,
        B: Record,
        D: Record,
        F: FnMut(A, B, D) -> R,
    {
        self.fetch("select_join3", sql, params, None)
            .await?
            .decode_join3(merge)
    }

    /// First column of the first row, or `None` when no row is produced.
    pub async fn get_value<V>(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<V>>
    where
        (V,): Record,
    {
        let rows = self.fetch("get_value", sql, params, Some(1)).await?;
        Ok(rows.decode::<(V,)>()?.into_iter().next().map(|(value,)| value))
    }

    /// Execute a command and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.prepare_dispatch("execute", sql, params).await?;
        executor::execute(self.live()?, sql, params).await
    }

    async fn fetch(
        &mut self,
        operation: &str,
        sql: &str,
        params: &[SqlValue],
        limit: Option<usize>,
    ) -> DbResult<RowSet> {
        self.prepare_dispatch(operation, sql, params).await?;
        executor::fetch_rows(self.live()?, sql, params, limit).await
    }

    async fn prepare_dispatch(
        &mut self,
        operation: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<()> {
        self.flush_pending().await?;
        if let Some(tap) = &self.tap {
            tap.on_dispatch(operation, sql, params);
        }
        Ok(())
    }

    fn live(&mut self) -> DbResult<&mut LiveConnection> {
        self.context_mut()?.connection_mut().live_mut()
    }

    // =========================================================================
    // Bulk transfer
    // =========================================================================

    /// Project `items` into the layout of the schema registered for `T`.
    pub fn project<T, I>(&self, items: I) -> DbResult<StagingTable>
    where
        T: Reflect,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let schema = self.context()?.model().entity::<T>().ok_or_else(|| {
            DbError::schema(
                format!("No destination schema registered for {}", type_name::<T>()),
                type_name::<T>(),
            )
        })?;
        TableProjector::new(&self.reflector).project(items, schema)
    }

    /// Open a bulk copy channel on this session's connection and transaction.
    pub async fn bulk_copy(&mut self) -> DbResult<BulkCopy<'_>> {
        self.flush_pending().await?;
        let transaction = self.valid_transaction().cloned();
        let batch_size = self.bulk_batch_size;
        Ok(BulkCopy::new(self.live()?, transaction).batch_size(batch_size))
    }

    /// Send every row of `table`, mapping each column to the same-named destination column.
    pub async fn bulk_transfer(&mut self, table: &StagingTable) -> DbResult<u64> {
        let mut copy = self.bulk_copy().await?.destination_table(table.table_name());
        for (ordinal, column) in table.columns().iter().enumerate() {
            copy = copy.map_column(ordinal, column.name.as_str());
        }
        let mut reader = table.reader();
        copy.write_to_server(&mut reader).await
    }

    /// Project `items` with the registered schema and transfer them.
    pub async fn bulk_insert<T: Reflect>(&mut self, items: &[T]) -> DbResult<u64> {
        let table = self.project::<T, _>(items)?;
        self.bulk_transfer(&table).await
    }

    /// Stream `items` into `table` positionally, one destination column per reflected
    /// field in declaration order. No staging table is built.
    pub async fn bulk_stream<T, I>(&mut self, table: &str, items: I) -> DbResult<u64>
    where
        T: Reflect,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let fields = self.reflector.fields::<T>();
        let mut copy = self.bulk_copy().await?.destination_table(table);
        for (ordinal, name) in fields.names().enumerate() {
            copy = copy.map_column(ordinal, name);
        }
        let mut cursor = BulkTransferCursor::new(items, Arc::clone(&fields));
        copy.write_to_server(&mut cursor).await
    }
}

impl<C: DbContext> Drop for Session<C> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        match &self.transaction {
            TransactionState::Pending {
                info,
                outcome: Outcome::Committed,
            } => warn!(
                transaction_id = %info.id,
                "Session dropped before a queued commit was sent; queued commit discarded, the server rolls the transaction back on disconnect"
            ),
            TransactionState::Active(info) | TransactionState::Pending { info, .. } => warn!(
                transaction_id = %info.id,
                "Session dropped with an unresolved transaction; the server rolls it back on disconnect"
            ),
            _ => {}
        }
    }
}

impl<C: DbContext> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("transaction", &self.transaction)
            .field("diagnostics", &self.tap.is_some())
            .finish()
    }
}

fn no_elements() -> DbError {
    DbError::invalid_operation("Sequence contains no elements")
}

fn single<T>(rows: Vec<T>) -> DbResult<Option<T>> {
    if rows.len() > 1 {
        return Err(DbError::invalid_operation(
            "Sequence contains more than one element",
        ));
    }
    Ok(rows.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_session() -> Session {
        Session::new(
            ModelContext::factory(Arc::new(ModelCatalog::new())),
            "sqlite::memory:",
            false,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_opens_connection() {
        let session = memory_session().await;
        assert!(session.is_open());
        assert!(session.transaction().is_none());
        assert_eq!(session.transaction_state(), &TransactionState::NotStarted);
    }

    #[tokio::test]
    async fn test_new_fails_on_bad_factory() {
        let result = Session::new(
            ModelContext::factory(Arc::new(ModelCatalog::new())),
            "oracle://db/orcl",
            false,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = memory_session().await;
        session.close_connection().await.unwrap();
        session.close_connection().await.unwrap();

        assert!(!session.is_open());
        assert!(session.is_closed());
        let err = session.open_connection().await.unwrap_err();
        assert!(matches!(err, DbError::ObjectDisposed { .. }));
    }

    #[tokio::test]
    async fn test_commit_and_rollback_without_transaction_are_noops() {
        let mut session = memory_session().await;
        session.commit().await.unwrap();
        session.rollback_if_uncommitted().await.unwrap();
        assert_eq!(session.transaction_state(), &TransactionState::NotStarted);
    }

    #[tokio::test]
    async fn test_commit_leaves_resolved_state() {
        let mut session = memory_session().await;
        let info = session
            .begin_transaction(IsolationLevel::default())
            .await
            .unwrap();
        assert_eq!(session.transaction(), Some(&info));
        assert_eq!(
            session.context().unwrap().transaction().map(|t| t.id.as_str()),
            Some(info.id.as_str())
        );

        session.commit().await.unwrap();
        assert!(session.transaction().is_none());
        assert!(session.context().unwrap().transaction().is_none());
        assert_eq!(
            session.transaction_state(),
            &TransactionState::Resolved {
                info: info.clone(),
                outcome: Outcome::Committed
            }
        );

        // A second commit finds nothing valid to resolve
        session.commit().await.unwrap();
        assert!(matches!(
            session.transaction_state(),
            TransactionState::Resolved { .. }
        ));
    }

    #[tokio::test]
    async fn test_begin_while_active_rolls_back_stale_transaction() {
        let mut session = memory_session().await;
        session
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        session
            .begin_transaction(IsolationLevel::default())
            .await
            .unwrap();
        session
            .execute("INSERT INTO t VALUES (1)", &[])
            .await
            .unwrap();

        let second = session
            .begin_transaction(IsolationLevel::Serializable)
            .await
            .unwrap();
        assert_eq!(session.transaction(), Some(&second));

        let count: Option<i64> = session.get_value("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count, Some(0));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_orphans_active_transaction() {
        let mut session = memory_session().await;
        let info = session
            .begin_transaction(IsolationLevel::default())
            .await
            .unwrap();

        session.close_connection().await.unwrap();
        assert_eq!(session.transaction_state(), &TransactionState::Orphaned(info));

        // Invalid transaction: resolution is a no-op
        session.commit().await.unwrap();
        session.rollback_if_uncommitted().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_sends_queued_rollback() {
        let mut session = memory_session().await;
        let info = session
            .begin_transaction(IsolationLevel::default())
            .await
            .unwrap();
        session.defer_resolution(&info.id, Outcome::RolledBack);

        session.close_connection().await.unwrap();
        assert_eq!(
            session.transaction_state(),
            &TransactionState::Resolved {
                info,
                outcome: Outcome::RolledBack
            }
        );
    }

    #[tokio::test]
    async fn test_dispose_rolls_back_active_transaction() {
        let mut session = memory_session().await;
        session
            .begin_transaction(IsolationLevel::default())
            .await
            .unwrap();
        session.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_variants() {
        let mut session = memory_session().await;
        session
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();
        session
            .execute("INSERT INTO t VALUES (1), (2)", &[])
            .await
            .unwrap();

        let err = session
            .select_single::<(i64,)>("SELECT id FROM t", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("more than one"));

        let none = session
            .select_single_or_default::<(i64,)>("SELECT id FROM t WHERE id > 5", &[])
            .await
            .unwrap();
        assert!(none.is_none());

        let err = session
            .select_first::<(i64,)>("SELECT id FROM t WHERE id > 5", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));

        let (id,) = session
            .select_single::<(i64,)>("SELECT id FROM t WHERE id = ?", &[SqlValue::Int(2)])
            .await
            .unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn test_single_helper() {
        assert_eq!(single(Vec::<i32>::new()).unwrap(), None);
        assert_eq!(single(vec![7]).unwrap(), Some(7));
        assert!(single(vec![1, 2]).is_err());
    }
}
