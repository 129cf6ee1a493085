//! db-session Library
//!
//! Session and transaction lifecycle management over a single native database connection
//! (SQLite, PostgreSQL, MySQL), plus reflective bulk transfer of typed collections through
//! the server's bulk copy channel.

pub mod bulk;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod session;

pub use bulk::{Reflect, RowReflector};
pub use config::{Config, SessionSettings};
pub use db::{IsolationLevel, TransactionInfo, TransactionState};
pub use error::{DbError, DbResult};
pub use session::{DbContext, DiagnosticTap, ModelContext, ScopedTransaction, Session};
