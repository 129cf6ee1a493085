//! Transaction state tracking.
//!
//! A session tracks at most one transaction. Instead of a nullable handle plus a
//! "has the connection gone away" check, the state is an explicit tag: never started,
//! active, resolution queued by a dropped scope, resolved, or orphaned by a closed
//! connection. Only an active transaction on an open connection is valid; commit,
//! rollback and disposal against anything else are no-ops.

use crate::models::DatabaseType;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Read uncommitted - lowest isolation.
    ReadUncommitted,
    /// Read committed - default.
    #[default]
    ReadCommitted,
    /// Repeatable read - prevents non-repeatable reads.
    RepeatableRead,
    /// Serializable - highest isolation.
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Statements that open a transaction at this level, in order.
    ///
    /// SQLite has no per-transaction isolation setting; Serializable takes the write
    /// lock up front (`BEGIN IMMEDIATE`), every other level is a deferred transaction.
    pub fn begin_statements(&self, db_type: DatabaseType) -> Vec<String> {
        match db_type {
            DatabaseType::PostgreSQL => vec![format!("BEGIN ISOLATION LEVEL {}", self.as_sql())],
            DatabaseType::MySQL => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", self.as_sql()),
                "START TRANSACTION".to_string(),
            ],
            DatabaseType::SQLite => match self {
                IsolationLevel::Serializable => vec!["BEGIN IMMEDIATE".to_string()],
                _ => vec!["BEGIN DEFERRED".to_string()],
            },
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How a transaction ended (or is going to end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    RolledBack,
}

impl Outcome {
    /// The statement that produces this outcome.
    pub fn statement(&self) -> &'static str {
        match self {
            Outcome::Committed => "COMMIT",
            Outcome::RolledBack => "ROLLBACK",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Committed => f.write_str("committed"),
            Outcome::RolledBack => f.write_str("rolled back"),
        }
    }
}

/// Metadata about a transaction begun on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    /// Unique transaction identifier
    pub id: String,
    pub isolation: IsolationLevel,
    /// When the transaction started (absolute time)
    pub started_at: DateTime<Utc>,
}

impl TransactionInfo {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            id: generate_transaction_id(),
            isolation,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction was ever begun on this session.
    #[default]
    NotStarted,
    /// Open on the server; statements on the session participate in it.
    Active(TransactionInfo),
    /// A scope ended without awaiting its resolution; the outcome is sent before the
    /// next operation on the session.
    Pending {
        info: TransactionInfo,
        outcome: Outcome,
    },
    /// Committed or rolled back. Stays tracked but inert.
    Resolved {
        info: TransactionInfo,
        outcome: Outcome,
    },
    /// The connection went away while the transaction was still open.
    Orphaned(TransactionInfo),
}

impl TransactionState {
    /// The active transaction, if any.
    pub fn active(&self) -> Option<&TransactionInfo> {
        match self {
            TransactionState::Active(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active(_))
    }

    /// Whether the transaction with `id` is the active one.
    pub fn is_active_id(&self, id: &str) -> bool {
        self.active().is_some_and(|info| info.id == id)
    }

    /// Metadata of the tracked transaction, whatever its state.
    pub fn info(&self) -> Option<&TransactionInfo> {
        match self {
            TransactionState::NotStarted => None,
            TransactionState::Active(info)
            | TransactionState::Pending { info, .. }
            | TransactionState::Resolved { info, .. }
            | TransactionState::Orphaned(info) => Some(info),
        }
    }

    /// Whether the server may still hold this transaction open.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            TransactionState::Active(_) | TransactionState::Pending { .. }
        )
    }

    /// Mark an open or pending transaction as orphaned. Other states are kept.
    pub fn orphan(&mut self) {
        let state = std::mem::take(self);
        *self = match state {
            TransactionState::Active(info) | TransactionState::Pending { info, .. } => {
                TransactionState::Orphaned(info)
            }
            other => other,
        };
    }

    /// Queue `outcome` for the active transaction with `id`. Returns false when that
    /// transaction is not the active one.
    pub fn defer(&mut self, id: &str, outcome: Outcome) -> bool {
        if !self.is_active_id(id) {
            return false;
        }
        let state = std::mem::take(self);
        *self = match state {
            TransactionState::Active(info) => TransactionState::Pending { info, outcome },
            other => other,
        };
        true
    }

    /// Take the queued resolution, leaving the state untouched when nothing is queued.
    pub fn take_pending(&mut self) -> Option<(TransactionInfo, Outcome)> {
        match std::mem::take(self) {
            TransactionState::Pending { info, outcome } => Some((info, outcome)),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
