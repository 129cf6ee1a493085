//! Database access layer.
//!
//! This module provides the plumbing beneath a session:
//! - Native connections (one per session, no pool)
//! - Statement execution and typed row decoding
//! - Parameter binding
//! - Transaction state tracking
//! - Backend dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub mod params;
pub mod transaction;

pub use connection::{DbConnection, LiveConnection};
pub use executor::{Record, RowSet};
pub use transaction::{IsolationLevel, Outcome, TransactionInfo, TransactionState};
