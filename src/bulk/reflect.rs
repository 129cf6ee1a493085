//! Row reflection: per-type ordered field descriptors, computed once and cached.
//!
//! Types opt in through [`Reflect`], usually via [`impl_reflect!`](crate::impl_reflect).
//! The descriptor order is the order the fields are listed in, which is the order the
//! [`BulkTransferCursor`](crate::bulk::BulkTransferCursor) exposes them positionally.
//! It is not a destination column order; the table projector matches by name instead.

use crate::models::SqlValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Name and accessor of one field of `T`.
pub struct FieldDescriptor<T> {
    name: &'static str,
    accessor: fn(&T) -> SqlValue,
}

impl<T> FieldDescriptor<T> {
    pub const fn new(name: &'static str, accessor: fn(&T) -> SqlValue) -> Self {
        Self { name, accessor }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read this field from `item`.
    pub fn read(&self, item: &T) -> SqlValue {
        (self.accessor)(item)
    }
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldDescriptor<T> {}

impl<T> std::fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

/// Types whose fields can be read positionally for bulk transfer.
pub trait Reflect: Sized + 'static {
    /// Field descriptors in declaration order.
    fn describe_fields() -> Vec<FieldDescriptor<Self>>;
}

/// Implement [`Reflect`] for a struct by listing its fields.
///
/// Every listed field must be `Clone` and convertible into [`SqlValue`].
///
/// ```ignore
/// struct Order { id: i64, customer: String, total: f64 }
/// impl_reflect!(Order { id, customer, total });
/// ```
#[macro_export]
macro_rules! impl_reflect {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::bulk::Reflect for $ty {
            fn describe_fields() -> ::std::vec::Vec<$crate::bulk::FieldDescriptor<Self>> {
                ::std::vec![
                    $(
                        $crate::bulk::FieldDescriptor::new(
                            ::std::stringify!($field),
                            |item: &Self| {
                                $crate::models::SqlValue::from(
                                    ::std::clone::Clone::clone(&item.$field),
                                )
                            },
                        ),
                    )+
                ]
            }
        }
    };
}

/// Ordered, immutable field descriptors of one type, with a name index.
pub struct FieldSet<T> {
    fields: Vec<FieldDescriptor<T>>,
    index: HashMap<&'static str, usize>,
}

impl<T> FieldSet<T> {
    pub fn new(fields: Vec<FieldDescriptor<T>>) -> Self {
        let mut index = HashMap::with_capacity(fields.len());
        for (ordinal, field) in fields.iter().enumerate() {
            // First declaration wins on duplicate names
            index.entry(field.name).or_insert(ordinal);
        }
        Self { fields, index }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<&FieldDescriptor<T>> {
        self.fields.get(ordinal)
    }

    /// Ordinal of the field called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor<T>> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.name)
    }
}

impl<T> std::fmt::Debug for FieldSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

type CachedFields = Arc<dyn Any + Send + Sync>;

/// Cache of [`FieldSet`]s keyed by type.
///
/// Each type's descriptors are computed on first request and never invalidated.
/// One reflector can be shared (through an `Arc`) by any number of sessions; after the
/// first request per type, lookups only take the read lock.
#[derive(Default)]
pub struct RowReflector {
    cache: RwLock<HashMap<TypeId, CachedFields>>,
}

impl RowReflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field descriptors of `T`. Repeated calls return the same `Arc`.
    pub fn fields<T: Reflect>(&self) -> Arc<FieldSet<T>> {
        if let Some(fields) = self.cached::<T>() {
            return fields;
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug!(type_name = std::any::type_name::<T>(), "Reflecting fields");
            Arc::new(FieldSet::new(T::describe_fields())) as CachedFields
        });

        match Arc::clone(entry).downcast::<FieldSet<T>>() {
            Ok(fields) => fields,
            Err(_) => {
                let fields = Arc::new(FieldSet::new(T::describe_fields()));
                *entry = Arc::clone(&fields) as CachedFields;
                fields
            }
        }
    }

    /// Number of types reflected so far.
    pub fn cached_types(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cached<T: Reflect>(&self) -> Option<Arc<FieldSet<T>>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(&TypeId::of::<T>())?;
        Arc::clone(entry).downcast::<FieldSet<T>>().ok()
    }
}

impl std::fmt::Debug for RowReflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReflector")
            .field("cached_types", &self.cached_types())
            .finish()
    }
}
