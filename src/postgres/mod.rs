//! Bundled PostgreSQL driver over `tokio_postgres`.
//!
//! The connection task is spawned onto the runtime; the client handle is
//! shared by statements through an `Arc`. Statements are server-side
//! prepared once and reused.

pub mod params;
pub mod query;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverFactory, DriverStatement};
use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

use params::Params;

/// Map driver failures, surfacing the SQLSTATE numerically (class 08 codes
/// parse to 8000/8003/8006) so the connection-loss classifier can see it.
pub(crate) fn map_pg_err(err: tokio_postgres::Error) -> SqlFluentError {
    if let Some(state) = err.code()
        && let Ok(code) = state.code().parse::<i64>()
    {
        return SqlFluentError::driver(Some(code), err.to_string());
    }
    SqlFluentError::PostgresError(err)
}

fn connect_string(config: &ConnectionConfig) -> String {
    let mut parts = vec![
        format!("host={}", config.host.as_deref().unwrap_or("localhost")),
        format!("port={}", config.port.unwrap_or(5432)),
    ];
    if let Some(user) = &config.username {
        parts.push(format!("user={user}"));
    }
    if let Some(password) = &config.password {
        parts.push(format!("password={password}"));
    }
    if let Some(database) = &config.database {
        parts.push(format!("dbname={database}"));
    }
    parts.join(" ")
}

/// Factory for the bundled PostgreSQL driver.
pub struct PostgresFactory;

#[async_trait]
impl DriverFactory for PostgresFactory {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        let (client, connection) = tokio_postgres::connect(&connect_string(config), NoTls)
            .await
            .map_err(map_pg_err)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection task ended with error");
            }
        });
        Ok(Arc::new(PostgresDriver {
            client: Arc::new(client),
        }))
    }
}

/// A live PostgreSQL connection.
pub struct PostgresDriver {
    client: Arc<Client>,
}

#[async_trait]
impl DriverConnection for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn DriverStatement>, SqlFluentError> {
        let statement = self.client.prepare(sql).await.map_err(map_pg_err)?;
        Ok(Arc::new(PostgresStatement {
            client: Arc::clone(&self.client),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn exec(&self, sql: &str) -> Result<u64, SqlFluentError> {
        self.client.execute(sql, &[]).await.map_err(map_pg_err)
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), SqlFluentError> {
        self.client.batch_execute(sql).await.map_err(map_pg_err)
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

    /// `LASTVAL()`, which errors when no sequence fired in this session;
    /// that case is reported as 0 rather than an error.
    async fn last_insert_id(&self) -> Result<i64, SqlFluentError> {
        match self.client.query_one("SELECT LASTVAL()", &[]).await {
            Ok(row) => row.try_get::<_, i64>(0).map_err(map_pg_err),
            Err(err) => {
                debug!(error = %err, "LASTVAL unavailable, reporting 0");
                Ok(0)
            }
        }
    }

    fn quote(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', "''"))
    }

    async fn server_version(&self) -> Result<String, SqlFluentError> {
        let row = self
            .client
            .query_one("SHOW server_version", &[])
            .await
            .map_err(map_pg_err)?;
        row.try_get::<_, String>(0).map_err(map_pg_err)
    }

    async fn ping(&self) -> Result<(), SqlFluentError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(map_pg_err)
    }
}

struct PostgresStatement {
    client: Arc<Client>,
    statement: Statement,
    sql: String,
}

#[async_trait]
impl DriverStatement for PostgresStatement {
    async fn query(&self, params: &[Value]) -> Result<ResultSet, SqlFluentError> {
        let converted = Params::convert(params)?;
        let rows = self
            .client
            .query(&self.statement, converted.as_refs())
            .await
            .map_err(map_pg_err)?;
        query::build_result_set(&self.statement, &rows)
    }

    async fn execute(&self, params: &[Value]) -> Result<u64, SqlFluentError> {
        let converted = Params::convert(params)?;
        self.client
            .execute(&self.statement, converted.as_refs())
            .await
            .map_err(map_pg_err)
    }

    async fn close(&self) {
        // server-side statements are released with the session
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}
