//! Column-mapped table projection.
//!
//! [`TableProjector::project`] turns a typed collection into a [`StagingTable`] whose
//! columns follow the destination [`EntitySchema`] order (not the source type's
//! declaration order), matching each destination column to a source field by name.

use crate::bulk::cursor::RowSource;
use crate::bulk::reflect::{Reflect, RowReflector};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnType, EntitySchema, SqlValue};
use std::any::type_name;
use std::borrow::Borrow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Rows ready for transfer, positionally aligned to `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingTable {
    table_name: String,
    columns: Vec<StagingColumn>,
    rows: Vec<Vec<SqlValue>>,
}

impl StagingTable {
    /// Destination table name (schema-qualified when the schema says so).
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[StagingColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&SqlValue> {
        self.rows.get(row)?.get(column)
    }

    /// A forward-only reader over the rows.
    pub fn reader(&self) -> StagingReader<'_> {
        StagingReader {
            table: self,
            next: 0,
            current: None,
        }
    }
}

/// [`RowSource`] over a [`StagingTable`]. Unlike the reflected cursor it knows its
/// column names and types.
#[derive(Debug)]
pub struct StagingReader<'t> {
    table: &'t StagingTable,
    next: usize,
    current: Option<&'t [SqlValue]>,
}

impl RowSource for StagingReader<'_> {
    fn advance(&mut self) -> bool {
        self.current = self.table.rows.get(self.next).map(Vec::as_slice);
        if self.current.is_some() {
            self.next += 1;
        }
        self.current.is_some()
    }

    fn field_count(&self) -> usize {
        self.table.column_count()
    }

    fn value_at(&self, ordinal: usize) -> DbResult<SqlValue> {
        let row = self
            .current
            .ok_or_else(|| DbError::invalid_operation("No current row"))?;
        row.get(ordinal).cloned().ok_or_else(|| {
            DbError::invalid_input(format!(
                "Ordinal {} is out of range (column count {})",
                ordinal,
                row.len()
            ))
        })
    }

    fn column_name(&self, ordinal: usize) -> DbResult<&str> {
        self.table
            .columns
            .get(ordinal)
            .map(|column| column.name.as_str())
            .ok_or_else(|| DbError::invalid_input(format!("Ordinal {} is out of range", ordinal)))
    }

    fn ordinal_of(&self, name: &str) -> DbResult<usize> {
        self.table
            .columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| DbError::schema(format!("No column named '{}'", name), &self.table.table_name))
    }

    fn column_type(&self, ordinal: usize) -> DbResult<ColumnType> {
        self.table
            .columns
            .get(ordinal)
            .map(|column| column.column_type)
            .ok_or_else(|| DbError::invalid_input(format!("Ordinal {} is out of range", ordinal)))
    }
}

/// Builds staging tables from typed collections.
#[derive(Debug, Clone, Copy)]
pub struct TableProjector<'r> {
    reflector: &'r RowReflector,
}

impl<'r> TableProjector<'r> {
    pub fn new(reflector: &'r RowReflector) -> Self {
        Self { reflector }
    }

    /// Project `items` into the column layout of `schema`.
    ///
    /// Every destination column is resolved to a source field before any item is read, so
    /// a name mismatch fails without touching the collection. A value whose type the
    /// destination column cannot store fails the projection as well.
    pub fn project<T, I>(&self, items: I, schema: &EntitySchema) -> DbResult<StagingTable>
    where
        T: Reflect,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let table_name = schema.qualified_name();
        let fields = self.reflector.fields::<T>();

        let mut accessors = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let field = fields
                .position(&column.field)
                .and_then(|ordinal| fields.get(ordinal))
                .ok_or_else(|| {
                    DbError::schema(
                        format!(
                            "Destination column '{}' has no source field '{}' on {}",
                            column.column,
                            column.field,
                            type_name::<T>()
                        ),
                        &table_name,
                    )
                })?;
            accessors.push(*field);
        }

        let columns: Vec<StagingColumn> = schema
            .columns
            .iter()
            .map(|column| StagingColumn {
                name: column.column.clone(),
                column_type: column.column_type,
            })
            .collect();

        let mut rows = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let item: &T = item.borrow();
            let mut row = Vec::with_capacity(columns.len());
            for (column, field) in columns.iter().zip(&accessors) {
                let value = field.read(item);
                if !column.column_type.accepts(&value) {
                    return Err(DbError::schema(
                        format!(
                            "Row {}: {} value of field '{}' cannot be stored in {} column '{}'",
                            index,
                            value.type_name(),
                            field.name(),
                            column.column_type,
                            column.name
                        ),
                        &table_name,
                    ));
                }
                row.push(value);
            }
            rows.push(row);
        }

        Ok(StagingTable {
            table_name,
            columns,
            rows,
        })
    }
}
