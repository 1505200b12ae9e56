use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

/// A prepared statement handle owned by a driver connection.
///
/// Handles are `Arc`-shared: the statement cache may evict one while a
/// caller still holds it; the handle stays usable until the last clone
/// drops. `close` releases the underlying cursor and must be safe to call
/// more than once.
#[async_trait]
pub trait DriverStatement: Send + Sync {
    /// Bind `params` positionally and fetch all rows.
    async fn query(&self, params: &[Value]) -> Result<ResultSet, SqlFluentError>;

    /// Bind `params` positionally and execute as DML, returning rows
    /// affected.
    async fn execute(&self, params: &[Value]) -> Result<u64, SqlFluentError>;

    /// Release the statement's cursor. Called on every execution path,
    /// success or failure, and again before cache eviction.
    async fn close(&self);

    /// The SQL text this statement was prepared from.
    fn sql(&self) -> &str;
}

/// A live connection to a database, as consumed by the execution engine.
///
/// This is the boundary to the underlying client library; the crate ships
/// implementations for SQLite (default), PostgreSQL and SQL Server, and
/// callers can plug any other driver (e.g. a MySQL client) through
/// [`DriverFactory`].
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// The SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Prepare a statement. The SQL is already in the driver's placeholder
    /// style.
    async fn prepare(&self, sql: &str) -> Result<Arc<dyn DriverStatement>, SqlFluentError>;

    /// Execute a statement without preparing (BEGIN, SAVEPOINT, LOCK
    /// TABLES, DDL).
    async fn exec(&self, sql: &str) -> Result<u64, SqlFluentError>;

    /// Execute a batch of semicolon-separated statements.
    async fn execute_batch(&self, sql: &str) -> Result<(), SqlFluentError>;

    async fn begin(&self) -> Result<(), SqlFluentError>;
    async fn commit(&self) -> Result<(), SqlFluentError>;
    async fn rollback(&self) -> Result<(), SqlFluentError>;

    /// Driver-reported id of the last inserted row (0 when none).
    async fn last_insert_id(&self) -> Result<i64, SqlFluentError>;

    /// Quote a string literal for inline use (FIELD() lists, REGEXP
    /// patterns).
    fn quote(&self, raw: &str) -> String;

    /// Server version string, e.g. `8.0.21`. Used for feature probes.
    async fn server_version(&self) -> Result<String, SqlFluentError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), SqlFluentError>;
}

/// Connects a [`ConnectionConfig`] to a live driver handle.
///
/// The registry selects a bundled factory by dialect; registering a custom
/// factory is how external drivers (MySQL clients among them) are attached.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError>;
}

/// Driver error codes classified as transient connection loss, per dialect.
/// An execution failing with one of these triggers the one-shot
/// reconnect-and-retry path when auto-reconnect is enabled.
#[must_use]
pub fn is_connection_lost(dialect: Dialect, code: Option<i64>) -> bool {
    let Some(code) = code else { return false };
    match dialect {
        // CR_SERVER_GONE_ERROR, CR_SERVER_LOST, CR_SERVER_LOST_EXTENDED
        Dialect::MySql => matches!(code, 2006 | 2013 | 2055),
        // PostgreSQL surfaces class-08 failures; drivers map them to 8000/8003/8006
        Dialect::Postgres => matches!(code, 8000 | 8003 | 8006),
        // SQLITE_IOERR, SQLITE_CANTOPEN
        Dialect::Sqlite => matches!(code, 10 | 14),
        // Broken pipe / transport-level failures reported by TDS
        Dialect::Mssql => matches!(code, 10054 | 10053 | 233),
    }
}
