//! Destination schema metadata.
//!
//! An [`EntitySchema`] describes where rows of one Rust type land: the (optionally
//! schema-qualified) table name and, per mapped field, the destination column and its
//! storage type. A [`ModelCatalog`] holds the schemas of every registered type.

use crate::models::SqlValue;
use serde::{Deserialize, Serialize};
use std::any::{TypeId, type_name};
use std::collections::HashMap;

/// Destination storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Whether a value can be stored in a column of this type.
    ///
    /// NULL fits every column; integers widen into floating point columns.
    pub fn accepts(&self, value: &SqlValue) -> bool {
        matches!(
            (self, value),
            (_, SqlValue::Null)
                | (Self::Bool, SqlValue::Bool(_))
                | (Self::Int, SqlValue::Int(_))
                | (Self::Float, SqlValue::Float(_) | SqlValue::Int(_))
                | (Self::Text, SqlValue::String(_))
                | (Self::Bytes, SqlValue::Bytes(_))
                | (Self::Timestamp, SqlValue::Timestamp(_))
                | (Self::Json, SqlValue::Json(_) | SqlValue::String(_))
        )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// One mapped column: source field name, destination column name, storage type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub field: String,
    pub column: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<ColumnSchema>,
}

impl EntitySchema {
    /// Create a schema for an unqualified table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Set the schema (namespace) the table lives in.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column whose name matches the source field name.
    pub fn column(self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        self.mapped_column(name.clone(), name, column_type)
    }

    /// Add a column fed by a differently named source field.
    pub fn mapped_column(
        mut self,
        field: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        self.columns.push(ColumnSchema {
            field: field.into(),
            column: column.into(),
            column_type,
        });
        self
    }

    /// Table name including the schema, e.g. `sales.orders`.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }
}

/// Registry of destination schemas keyed by Rust type.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entities: HashMap<TypeId, EntitySchema>,
    names: HashMap<TypeId, &'static str>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema for `T`.
    pub fn register<T: 'static>(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(TypeId::of::<T>(), schema);
        self.names.insert(TypeId::of::<T>(), type_name::<T>());
        self
    }

    /// Look up the schema registered for `T`.
    pub fn entity<T: 'static>(&self) -> Option<&EntitySchema> {
        self.entities.get(&TypeId::of::<T>())
    }

    /// Names of all registered types.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.names.values().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order;
    struct Customer;

    #[test]
    fn test_column_type_accepts() {
        assert!(ColumnType::Int.accepts(&SqlValue::Int(1)));
        assert!(ColumnType::Float.accepts(&SqlValue::Int(1)));
        assert!(ColumnType::Text.accepts(&SqlValue::Null));
        assert!(!ColumnType::Int.accepts(&SqlValue::String("1".to_string())));
        assert!(!ColumnType::Bool.accepts(&SqlValue::Int(1)));
    }

    #[test]
    fn test_entity_schema_builder() {
        let schema = EntitySchema::new("orders")
            .with_schema("sales")
            .column("id", ColumnType::Int)
            .mapped_column("total_cents", "total", ColumnType::Int);

        assert_eq!(schema.qualified_name(), "sales.orders");
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].field, "id");
        assert_eq!(schema.columns[0].column, "id");
        assert_eq!(schema.columns[1].field, "total_cents");
        assert_eq!(schema.columns[1].column, "total");
    }

    #[test]
    fn test_catalog_lookup_by_type() {
        let catalog = ModelCatalog::new()
            .register::<Order>(EntitySchema::new("orders"))
            .register::<Customer>(EntitySchema::new("customers"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.entity::<Order>().unwrap().table, "orders");
        assert_eq!(catalog.entity::<Customer>().unwrap().table, "customers");
        assert!(catalog.entity::<String>().is_none());

        let names = catalog.registered_types();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|name| name.ends_with("Order")));
    }
}
