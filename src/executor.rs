//! Execution engine: placeholder translation, statement-cache lookup,
//! parameter binding and the reconnect-retry path.
//!
//! The engine borrows the shared pieces owned by [`Db`](crate::db::Db) so a
//! builder can drive executions without holding locks across awaits itself.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::driver::{DriverConnection, is_connection_lost};
use crate::error::SqlFluentError;
use crate::registry::ConnectionRegistry;
use crate::results::ResultSet;
use crate::safety::TraceLog;
use crate::stmt_cache::StatementCache;
use crate::translation::{count_placeholders, number_placeholders};
use crate::value::Value;

pub(crate) struct Engine<'a> {
    pub registry: &'a ConnectionRegistry,
    pub cache: &'a StatementCache,
    pub trace: &'a TraceLog,
}

impl Engine<'_> {
    /// The live connection for `name`, connecting lazily.
    pub(crate) async fn connection(
        &self,
        name: &str,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        self.registry.connection(name).await
    }

    fn check_bindable(sql: &str, params: &[Value]) -> Result<(), SqlFluentError> {
        let expected = count_placeholders(sql);
        if expected != params.len() {
            return Err(SqlFluentError::ParameterError(format!(
                "statement expects {expected} parameters, {} bound",
                params.len()
            )));
        }
        if let Some(bad) = params.iter().find(|p| !p.is_bindable()) {
            return Err(SqlFluentError::ParameterError(format!(
                "unresolved splice value reached bind time: {bad:?}"
            )));
        }
        Ok(())
    }

    /// Run a row-returning statement through the cache, retrying once after
    /// a reconnect when the connection was lost mid-flight.
    pub(crate) async fn query(
        &self,
        op: &str,
        name: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<ResultSet, SqlFluentError> {
        Self::check_bindable(sql, params)?;
        let conn = self.registry.connection(name).await?;
        let translated = number_placeholders(sql, conn.dialect().placeholder_style());
        let started = Instant::now();

        let stmt = self.cache.get_or_prepare(name, &conn, &translated).await?;
        let result = match stmt.query(params).await {
            Ok(rows) => {
                self.registry.reset_reconnect_attempts(name).await;
                Ok(rows)
            }
            Err(err) => {
                let fresh = self.recover(name, &conn, err).await?;
                let stmt = self.cache.get_or_prepare(name, &fresh, &translated).await?;
                let rows = stmt.query(params).await?;
                self.registry.reset_reconnect_attempts(name).await;
                Ok(rows)
            }
        };
        self.trace.record(&translated, started.elapsed(), op);
        result
    }

    /// Run a non-row statement; returns the affected-row count. Same cache
    /// and retry behavior as [`Engine::query`].
    pub(crate) async fn execute(
        &self,
        op: &str,
        name: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, SqlFluentError> {
        Self::check_bindable(sql, params)?;
        let conn = self.registry.connection(name).await?;
        let translated = number_placeholders(sql, conn.dialect().placeholder_style());
        let started = Instant::now();

        let stmt = self.cache.get_or_prepare(name, &conn, &translated).await?;
        let result = match stmt.execute(params).await {
            Ok(affected) => {
                self.registry.reset_reconnect_attempts(name).await;
                Ok(affected)
            }
            Err(err) => {
                let fresh = self.recover(name, &conn, err).await?;
                let stmt = self.cache.get_or_prepare(name, &fresh, &translated).await?;
                let affected = stmt.execute(params).await?;
                self.registry.reset_reconnect_attempts(name).await;
                Ok(affected)
            }
        };
        self.trace.record(&translated, started.elapsed(), op);
        result
    }

    /// Run unparameterized SQL outside the statement cache (transaction
    /// control, LOCK TABLES, savepoints).
    pub(crate) async fn exec_raw(
        &self,
        op: &str,
        name: &str,
        sql: &str,
    ) -> Result<u64, SqlFluentError> {
        let conn = self.registry.connection(name).await?;
        let started = Instant::now();
        let result = match conn.exec(sql).await {
            Ok(affected) => {
                self.registry.reset_reconnect_attempts(name).await;
                Ok(affected)
            }
            Err(err) => {
                let fresh = self.recover(name, &conn, err).await?;
                let affected = fresh.exec(sql).await?;
                self.registry.reset_reconnect_attempts(name).await;
                Ok(affected)
            }
        };
        self.trace.record(sql, started.elapsed(), op);
        result
    }

    /// Decide whether `err` is a recoverable connection loss; when it is,
    /// drop the connection's cached statements and open a fresh handle.
    /// Anything non-recoverable is handed straight back.
    async fn recover(
        &self,
        name: &str,
        conn: &Arc<dyn DriverConnection>,
        err: SqlFluentError,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        if !is_connection_lost(conn.dialect(), err.driver_code()) {
            return Err(err);
        }
        let config = self.registry.config(name).await?;
        if !config.auto_reconnect {
            return Err(err);
        }
        let attempt = self.registry.note_reconnect_attempt(name).await;
        if attempt > config.max_reconnect_attempts {
            warn!(
                connection = name,
                attempt, "reconnect attempts exhausted, surfacing driver error"
            );
            return Err(err);
        }
        warn!(connection = name, attempt, error = %err, "connection lost, reconnecting");
        // cached statements belong to the dead handle
        self.cache.clear(Some(name)).await;
        self.registry.reconnect(name).await
    }
}
