//! Forward-only positional row sources feeding the bulk copy channel.

use crate::bulk::reflect::{FieldSet, Reflect};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnType, SqlValue};
use std::borrow::Borrow;
use std::sync::Arc;

/// A single-pass, positional row reader.
///
/// Only `advance`, `field_count` and `value_at` are required; the bulk copy channel
/// reads nothing else. The remaining capabilities of a general tabular reader default to
/// [`DbError::Unsupported`].
pub trait RowSource {
    /// Move to the next row. Returns false once the source is exhausted.
    fn advance(&mut self) -> bool;

    fn field_count(&self) -> usize;

    /// Value at `ordinal` on the current row.
    fn value_at(&self, ordinal: usize) -> DbResult<SqlValue>;

    fn column_name(&self, _ordinal: usize) -> DbResult<&str> {
        Err(DbError::unsupported("column_name on a positional row source"))
    }

    fn ordinal_of(&self, _name: &str) -> DbResult<usize> {
        Err(DbError::unsupported("ordinal_of on a positional row source"))
    }

    fn column_type(&self, _ordinal: usize) -> DbResult<ColumnType> {
        Err(DbError::unsupported("column_type on a positional row source"))
    }

    fn next_result_set(&mut self) -> DbResult<bool> {
        Err(DbError::unsupported("multiple result sets on a positional row source"))
    }

    fn records_affected(&self) -> DbResult<u64> {
        Err(DbError::unsupported("records_affected on a positional row source"))
    }
}

/// Positional reader over an in-memory sequence of reflected items.
///
/// Items are pulled from the iterator one at a time; nothing is buffered beyond the
/// current item. Fields are exposed in the [`FieldSet`] order.
pub struct BulkTransferCursor<T, I: Iterator> {
    items: I,
    fields: Arc<FieldSet<T>>,
    current: Option<I::Item>,
    exhausted: bool,
}

impl<T, I> BulkTransferCursor<T, I>
where
    T: Reflect,
    I: Iterator,
    I::Item: Borrow<T>,
{
    pub fn new<S>(items: S, fields: Arc<FieldSet<T>>) -> Self
    where
        S: IntoIterator<IntoIter = I>,
    {
        Self {
            items: items.into_iter(),
            fields,
            current: None,
            exhausted: false,
        }
    }

    pub fn fields(&self) -> &FieldSet<T> {
        &self.fields
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl<T, I> RowSource for BulkTransferCursor<T, I>
where
    T: Reflect,
    I: Iterator,
    I::Item: Borrow<T>,
{
    fn advance(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        self.current = self.items.next();
        if self.current.is_none() {
            self.exhausted = true;
        }
        !self.exhausted
    }

    fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn value_at(&self, ordinal: usize) -> DbResult<SqlValue> {
        let Some(item) = &self.current else {
            return Err(if self.exhausted {
                DbError::invalid_operation("Cursor is exhausted")
            } else {
                DbError::invalid_operation("advance() must be called before reading values")
            });
        };

        let field = self.fields.get(ordinal).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Ordinal {} is out of range (field count {})",
                ordinal,
                self.fields.len()
            ))
        })?;
        Ok(field.read(Borrow::<T>::borrow(item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::RowReflector;

    struct Reading {
        sensor: String,
        value: f64,
    }

    crate::impl_reflect!(Reading { sensor, value });

    fn readings() -> Vec<Reading> {
        vec![
            Reading {
                sensor: "a".to_string(),
                value: 1.5,
            },
            Reading {
                sensor: "b".to_string(),
                value: -2.0,
            },
        ]
    }

    #[test]
    fn test_reads_rows_in_order() {
        let reflector = RowReflector::new();
        let items = readings();
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Reading>());

        assert_eq!(cursor.field_count(), 2);

        assert!(cursor.advance());
        assert_eq!(cursor.value_at(0).unwrap(), SqlValue::String("a".into()));
        assert_eq!(cursor.value_at(1).unwrap(), SqlValue::Float(1.5));

        assert!(cursor.advance());
        assert_eq!(cursor.value_at(0).unwrap(), SqlValue::String("b".into()));

        assert!(!cursor.advance());
        assert!(cursor.is_exhausted());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_owned_items() {
        let reflector = RowReflector::new();
        let mut cursor = BulkTransferCursor::new(readings(), reflector.fields::<Reading>());
        assert!(cursor.advance());
        assert_eq!(cursor.value_at(1).unwrap(), SqlValue::Float(1.5));
    }

    #[test]
    fn test_read_before_advance_fails() {
        let reflector = RowReflector::new();
        let items = readings();
        let cursor = BulkTransferCursor::new(&items, reflector.fields::<Reading>());

        let err = cursor.value_at(0).unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation { .. }));
    }

    #[test]
    fn test_read_after_exhaustion_fails() {
        let reflector = RowReflector::new();
        let items: Vec<Reading> = Vec::new();
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Reading>());

        assert!(!cursor.advance());
        let err = cursor.value_at(0).unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_ordinal_out_of_range() {
        let reflector = RowReflector::new();
        let items = readings();
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Reading>());
        cursor.advance();

        let err = cursor.value_at(2).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_unsupported_capabilities() {
        let reflector = RowReflector::new();
        let items = readings();
        let mut cursor = BulkTransferCursor::new(&items, reflector.fields::<Reading>());

        assert!(matches!(
            cursor.column_name(0),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            cursor.ordinal_of("sensor"),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            cursor.column_type(0),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            cursor.next_result_set(),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            cursor.records_affected(),
            Err(DbError::Unsupported { .. })
        ));
    }
}
