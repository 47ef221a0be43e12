mod introspect;
mod pool;
mod query;
mod session;

pub use introspect::PostgresIntrospector;
pub use pool::{connect_options, create_pool, warm_up};
pub use session::{PostgresSession, PostgresSessionFactory};

use spendql_core::SpendqlError;

/// Classify a driver error raised while establishing a connection.
pub(crate) fn connection_error(e: sqlx::Error) -> SpendqlError {
    // SQLSTATE class 28: invalid authorization specification
    let auth_failure = e
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code.starts_with("28"));
    if auth_failure {
        SpendqlError::Authentication(e.to_string())
    } else {
        SpendqlError::Connection(e.to_string())
    }
}

pub(crate) fn storage_error(e: sqlx::Error) -> SpendqlError {
    SpendqlError::Storage(e.to_string())
}
