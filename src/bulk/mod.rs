//! Bulk transfer of typed in-memory collections.
//!
//! - [`RowReflector`]: per-type field descriptors, computed once
//! - [`BulkTransferCursor`]: single-pass positional reader over a collection
//! - [`TableProjector`]: schema-ordered [`StagingTable`] built by name matching
//! - [`BulkCopy`]: the server-side bulk copy channel

pub mod copy;
pub mod cursor;
pub mod projector;
pub mod reflect;

pub use copy::{BulkCopy, ColumnMapping, DEFAULT_BATCH_SIZE};
pub use cursor::{BulkTransferCursor, RowSource};
pub use projector::{StagingColumn, StagingReader, StagingTable, TableProjector};
pub use reflect::{FieldDescriptor, FieldSet, Reflect, RowReflector};
