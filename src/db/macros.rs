//! Backend dispatch macro.
//!
//! Every operation on a live connection is the same code written three times against
//! three concrete sqlx connection types. This macro expands the match over
//! [`LiveConnection`](crate::db::connection::LiveConnection) so call sites stay linear.

/// Generate the match arms over `LiveConnection` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(live, {
///     MySql(c) => mysql::execute(c, sql).await,
///     Postgres(c) => postgres::execute(c, sql).await,
///     SQLite(c) => sqlite::execute(c, sql).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::LiveConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
