//! Diagnostic hook invoked before every query or command dispatch.
//!
//! The operation name is passed explicitly by each dispatch method (`"select_first"`,
//! `"execute"`, ...). Bulk transfers never go through the tap.

use crate::models::SqlValue;
use tracing::debug;

/// Observer notified before a statement is dispatched on a session.
///
/// Purely side-effecting; it cannot veto or alter the statement.
pub trait DiagnosticTap: Send + Sync {
    fn on_dispatch(&self, operation: &str, sql: &str, params: &[SqlValue]);
}

impl<F> DiagnosticTap for F
where
    F: Fn(&str, &str, &[SqlValue]) + Send + Sync,
{
    fn on_dispatch(&self, operation: &str, sql: &str, params: &[SqlValue]) {
        self(operation, sql, params)
    }
}

/// Tap that writes dispatched statements to the `db_session::diagnostics` tracing target.
///
/// Installed by [`Session::new`](crate::session::Session::new) when diagnostics are enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTap;

impl DiagnosticTap for TracingTap {
    fn on_dispatch(&self, operation: &str, sql: &str, params: &[SqlValue]) {
        let params = serde_json::to_string(params).unwrap_or_else(|_| "<unserializable>".into());
        debug!(
            target: "db_session::diagnostics",
            operation = %operation,
            sql = %sql,
            params = %params,
            "Dispatching statement"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_tap() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tap = move |operation: &str, sql: &str, params: &[SqlValue]| {
            sink.lock()
                .unwrap()
                .push(format!("{operation}|{sql}|{}", params.len()));
        };

        tap.on_dispatch("execute", "DELETE FROM t WHERE id = ?", &[SqlValue::Int(1)]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["execute|DELETE FROM t WHERE id = ?|1".to_string()]
        );
    }

    #[test]
    fn test_tracing_tap_as_trait_object() {
        let tap: Arc<dyn DiagnosticTap> = Arc::new(TracingTap);
        tap.on_dispatch("select", "SELECT 1", &[]);
    }
}
