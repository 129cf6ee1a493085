//! Scoped transaction guard.

use crate::db::{Outcome, TransactionInfo};
use crate::error::{DbError, DbResult};
use crate::session::{DbContext, ModelContext, Session};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Resolves its transaction when the scope ends: commit if [`complete`](Self::complete)
/// was called, roll back otherwise.
///
/// The guard borrows the session and dereferences to it, so statements issued through the
/// guard run inside its transaction.
///
/// Prefer `dispose().await`. A guard that is simply dropped cannot talk to the server;
/// its resolution is queued on the session and sent before the session's next operation
/// (including `Session::close_connection` and `Session::dispose`). If the session itself
/// is dropped first, a queued commit is lost and the server rolls the transaction back.
///
/// ```ignore
/// let mut scope = session.begin_scoped_transaction(IsolationLevel::ReadCommitted).await?;
/// scope.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[]).await?;
/// scope.complete()?;
/// scope.dispose().await?;
/// ```
pub struct ScopedTransaction<'s, C: DbContext = ModelContext> {
    session: &'s mut Session<C>,
    transaction: TransactionInfo,
    completed: bool,
    disposed: bool,
}

impl<'s, C: DbContext> ScopedTransaction<'s, C> {
    pub(crate) fn new(session: &'s mut Session<C>, transaction: TransactionInfo) -> Self {
        Self {
            session,
            transaction,
            completed: false,
            disposed: false,
        }
    }

    pub fn transaction_info(&self) -> &TransactionInfo {
        &self.transaction
    }

    /// Whether the wrapped transaction is still the session's active transaction on an
    /// open connection.
    pub fn is_valid(&self) -> bool {
        self.session.is_open()
            && self
                .session
                .transaction_state()
                .is_active_id(&self.transaction.id)
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Request a commit when the scope ends.
    ///
    /// Fails with [`DbError::ObjectDisposed`] when the transaction is no longer valid and
    /// with [`DbError::InvalidOperation`] when called a second time. Neither failure
    /// changes the guard.
    pub fn complete(&mut self) -> DbResult<()> {
        if !self.is_valid() {
            return Err(DbError::object_disposed(format!(
                "transaction {}",
                self.transaction.id
            )));
        }
        if self.completed {
            return Err(DbError::invalid_operation("Already marked as completed"));
        }
        self.completed = true;
        Ok(())
    }

    /// End the scope now: commit when complete, roll back otherwise.
    ///
    /// No-op when the transaction is no longer valid.
    pub async fn dispose(mut self) -> DbResult<()> {
        self.disposed = true;

        if !self.is_valid() {
            debug!(
                transaction_id = %self.transaction.id,
                "Scope ended on an invalid transaction"
            );
            return Ok(());
        }

        match self.outcome() {
            Outcome::Committed => self.session.commit().await,
            Outcome::RolledBack => self.session.rollback_if_uncommitted().await,
        }
    }

    fn outcome(&self) -> Outcome {
        if self.completed {
            Outcome::Committed
        } else {
            Outcome::RolledBack
        }
    }
}

impl<C: DbContext> Deref for ScopedTransaction<'_, C> {
    type Target = Session<C>;

    fn deref(&self) -> &Session<C> {
        self.session
    }
}

impl<C: DbContext> DerefMut for ScopedTransaction<'_, C> {
    fn deref_mut(&mut self) -> &mut Session<C> {
        self.session
    }
}

impl<C: DbContext> Drop for ScopedTransaction<'_, C> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        let outcome = self.outcome();
        self.session.defer_resolution(&self.transaction.id, outcome);
    }
}

impl<C: DbContext> std::fmt::Debug for ScopedTransaction<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("transaction", &self.transaction.id)
            .field("completed", &self.completed)
            .finish()
    }
}
