//! Bundled SQLite driver over `rusqlite`.
//!
//! One shared connection behind a blocking mutex; every rusqlite call runs
//! on the blocking thread pool. Statement handles carry only the SQL text:
//! rusqlite's `prepare_cached` keeps the compiled statement alive on the
//! connection, so "closing" a handle releases nothing extra.

pub mod params;
pub mod query;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverFactory, DriverStatement};
use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

/// Map rusqlite failures, surfacing the primary result code so the
/// connection-loss classifier can see it.
pub(crate) fn map_sqlite_err(err: rusqlite::Error) -> SqlFluentError {
    if let rusqlite::Error::SqliteFailure(code, ref message) = err {
        let primary = i64::from(code.extended_code & 0xff);
        let message = message
            .clone()
            .unwrap_or_else(|| code.to_string());
        return SqlFluentError::driver(Some(primary), message);
    }
    SqlFluentError::SqliteError(err)
}

fn join_err(err: tokio::task::JoinError) -> SqlFluentError {
    SqlFluentError::ExecutionError(format!("sqlite blocking task failed: {err}"))
}

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<std::sync::MutexGuard<'_, Connection>, SqlFluentError> {
    conn.lock()
        .map_err(|_| SqlFluentError::ExecutionError("sqlite connection mutex poisoned".to_string()))
}

/// Factory for the bundled SQLite driver.
pub struct SqliteFactory;

#[async_trait]
impl DriverFactory for SqliteFactory {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        let path = config
            .socket_or_path
            .clone()
            .unwrap_or_else(|| ":memory:".to_string());
        let conn = tokio::task::spawn_blocking(move || {
            if path == ":memory:" {
                Connection::open_in_memory()
            } else {
                Connection::open(&path)
            }
        })
        .await
        .map_err(join_err)?
        .map_err(map_sqlite_err)?;
        Ok(Arc::new(SqliteDriver {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// A live SQLite connection.
pub struct SqliteDriver {
    conn: SharedConnection,
}

impl SqliteDriver {
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SqlFluentError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SqlFluentError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl DriverConnection for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn DriverStatement>, SqlFluentError> {
        let sql = Arc::new(sql.to_string());
        let warm = Arc::clone(&sql);
        // compile eagerly so syntax errors surface at prepare time
        self.with_conn(move |conn| {
            conn.prepare_cached(&warm).map_err(map_sqlite_err)?;
            Ok(())
        })
        .await?;
        Ok(Arc::new(SqliteStatement {
            conn: Arc::clone(&self.conn),
            sql,
        }))
    }

    async fn exec(&self, sql: &str) -> Result<u64, SqlFluentError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let affected = conn.execute(&sql, []).map_err(map_sqlite_err)?;
            Ok(affected as u64)
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), SqlFluentError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(map_sqlite_err))
            .await
    }

    async fn begin(&self) -> Result<(), SqlFluentError> {
        self.execute_batch("BEGIN").await
    }

    async fn commit(&self) -> Result<(), SqlFluentError> {
        self.execute_batch("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), SqlFluentError> {
        self.execute_batch("ROLLBACK").await
    }

    async fn last_insert_id(&self) -> Result<i64, SqlFluentError> {
        self.with_conn(|conn| Ok(conn.last_insert_rowid())).await
    }

    fn quote(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', "''"))
    }

    async fn server_version(&self) -> Result<String, SqlFluentError> {
        Ok(rusqlite::version().to_string())
    }

    async fn ping(&self) -> Result<(), SqlFluentError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(map_sqlite_err)
        })
        .await
    }
}

struct SqliteStatement {
    conn: SharedConnection,
    sql: Arc<String>,
}

#[async_trait]
impl DriverStatement for SqliteStatement {
    async fn query(&self, params: &[Value]) -> Result<ResultSet, SqlFluentError> {
        let converted = params::to_sqlite_values(params)?;
        let conn = Arc::clone(&self.conn);
        let sql = Arc::clone(&self.sql);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            let mut stmt = guard.prepare_cached(&sql).map_err(map_sqlite_err)?;
            query::build_result_set(&mut stmt, &converted)
        })
        .await
        .map_err(join_err)?
    }

    async fn execute(&self, params: &[Value]) -> Result<u64, SqlFluentError> {
        let converted = params::to_sqlite_values(params)?;
        let conn = Arc::clone(&self.conn);
        let sql = Arc::clone(&self.sql);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            let mut stmt = guard.prepare_cached(&sql).map_err(map_sqlite_err)?;
            let affected = stmt
                .execute(rusqlite::params_from_iter(converted.iter()))
                .map_err(map_sqlite_err)?;
            Ok(affected as u64)
        })
        .await
        .map_err(join_err)?
    }

    async fn close(&self) {
        // statements live in rusqlite's per-connection cache
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}
