//! The logical context a session binds to its connection.

use crate::db::{DbConnection, TransactionInfo};
use crate::error::DbResult;
use crate::models::ModelCatalog;
use std::sync::Arc;

/// A logical database context: owns the physical connection and knows the destination
/// schemas of the types it maps.
///
/// A [`Session`](crate::session::Session) builds one through a factory, opens its
/// connection, and notifies it whenever a transaction begins or ends so context-level
/// work can participate in it. The session never inspects how the context was configured.
pub trait DbContext: Send {
    fn connection(&self) -> &DbConnection;

    fn connection_mut(&mut self) -> &mut DbConnection;

    /// Schema metadata consumed by the table projector.
    fn model(&self) -> &ModelCatalog;

    /// Called with the transaction statements now run in, or `None` once it is resolved.
    fn use_transaction(&mut self, _transaction: Option<&TransactionInfo>) {}
}

/// Stock context over a [`ModelCatalog`].
#[derive(Debug)]
pub struct ModelContext {
    connection: DbConnection,
    model: Arc<ModelCatalog>,
    diagnostics: bool,
    transaction: Option<TransactionInfo>,
}

impl ModelContext {
    pub fn new(
        connection_string: &str,
        model: Arc<ModelCatalog>,
        diagnostics: bool,
    ) -> DbResult<Self> {
        Ok(Self {
            connection: DbConnection::new(connection_string)?,
            model,
            diagnostics,
            transaction: None,
        })
    }

    /// Context factory for [`Session::new`](crate::session::Session::new).
    ///
    /// Every context built by the factory shares `model`.
    pub fn factory(
        model: Arc<ModelCatalog>,
    ) -> impl Fn(&str, bool) -> DbResult<ModelContext> + Clone + Send + Sync {
        move |connection_string: &str, diagnostics: bool| {
            ModelContext::new(connection_string, Arc::clone(&model), diagnostics)
        }
    }

    /// Whether the context was built with diagnostics enabled.
    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// The transaction the context currently participates in.
    pub fn transaction(&self) -> Option<&TransactionInfo> {
        self.transaction.as_ref()
    }
}

impl DbContext for ModelContext {
    fn connection(&self) -> &DbConnection {
        &self.connection
    }

    fn connection_mut(&mut self) -> &mut DbConnection {
        &mut self.connection
    }

    fn model(&self) -> &ModelCatalog {
        &self.model
    }

    fn use_transaction(&mut self, transaction: Option<&TransactionInfo>) {
        self.transaction = transaction.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IsolationLevel;
    use crate::models::{DatabaseType, EntitySchema};

    struct Marker;

    #[test]
    fn test_factory_shares_model() {
        let model = Arc::new(ModelCatalog::new().register::<Marker>(EntitySchema::new("markers")));
        let factory = ModelContext::factory(Arc::clone(&model));

        let first = factory("sqlite::memory:", true).unwrap();
        let second = factory("sqlite::memory:", false).unwrap();

        assert!(first.diagnostics());
        assert!(!second.diagnostics());
        assert!(first.model().entity::<Marker>().is_some());
        assert_eq!(Arc::strong_count(&model), 3);
        assert_eq!(first.connection().db_type(), DatabaseType::SQLite);
        assert!(!first.connection().is_open());
    }

    #[test]
    fn test_factory_rejects_unknown_scheme() {
        let factory = ModelContext::factory(Arc::new(ModelCatalog::new()));
        assert!(factory("oracle://db/orcl", false).is_err());
    }

    #[test]
    fn test_use_transaction() {
        let mut context =
            ModelContext::new("sqlite::memory:", Arc::new(ModelCatalog::new()), false).unwrap();
        let info = TransactionInfo::new(IsolationLevel::default());

        context.use_transaction(Some(&info));
        assert_eq!(context.transaction(), Some(&info));

        context.use_transaction(None);
        assert!(context.transaction().is_none());
    }
}
