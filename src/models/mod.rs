//! Data models for db-session.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, mask_connection_string};
pub use schema::{ColumnSchema, ColumnType, EntitySchema, ModelCatalog};
pub use value::SqlValue;
