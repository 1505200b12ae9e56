//! The top-level handle: named connections plus the shared execution
//! machinery (statement cache, trace log, security monitor).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::builder::QueryBuilder;
use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::DriverFactory;
use crate::error::SqlFluentError;
use crate::executor::Engine;
use crate::registry::ConnectionRegistry;
use crate::safety::{SecurityMonitor, TraceLog};
use crate::stmt_cache::StatementCache;

/// Connection facts a builder needs synchronously, captured at registration.
#[derive(Debug, Clone)]
pub(crate) struct ConnMeta {
    pub dialect: Dialect,
    pub prefix: Option<String>,
}

/// Entry point for building and running statements.
///
/// One `Db` holds any number of named connections, a shared per-connection
/// prepared-statement cache, a bounded trace log and the security monitor.
/// Wrap it in an [`Arc`] and clone freely; builders keep the handle alive.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use sql_fluent::{ConnectionConfig, Db};
/// # async fn demo() -> Result<(), sql_fluent::SqlFluentError> {
/// let db = Arc::new(Db::new());
/// db.add_connection("default", ConnectionConfig::sqlite(":memory:")).await?;
/// let users = db.query("default")?.where_eq("active", true)?.get("users").await?;
/// # let _ = users; Ok(())
/// # }
/// ```
pub struct Db {
    registry: ConnectionRegistry,
    cache: StatementCache,
    trace: TraceLog,
    monitor: SecurityMonitor,
    meta: RwLock<HashMap<String, ConnMeta>>,
    /// Per-connection result of the MySQL `AS new_row` version probe.
    insert_alias: Mutex<HashMap<String, bool>>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("cache", &self.cache)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

fn version_at_least(version: &str, min: (u64, u64, u64)) -> bool {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<u64>().ok());
    let found = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    found >= min
}

impl Db {
    #[must_use]
    pub fn new() -> Self {
        Db {
            registry: ConnectionRegistry::new(),
            cache: StatementCache::default(),
            trace: TraceLog::default(),
            monitor: SecurityMonitor::new(),
            meta: RwLock::new(HashMap::new()),
            insert_alias: Mutex::new(HashMap::new()),
        }
    }

    /// Override the statement-cache bound (default
    /// [`DEFAULT_STMT_CACHE_SIZE`](crate::stmt_cache::DEFAULT_STMT_CACHE_SIZE)).
    #[must_use]
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Db {
            cache: StatementCache::with_capacity(capacity),
            ..Db::new()
        }
    }

    /// Register a named connection using the bundled driver for its dialect.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ConfigError`] when no bundled driver exists
    /// for the dialect.
    pub async fn add_connection(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Result<(), SqlFluentError> {
        let name = name.into();
        self.note_meta(&name, &config);
        self.registry.add_connection(name, config).await
    }

    /// Register a named connection with a caller-supplied driver factory;
    /// the seam for dialects the crate does not bundle a client for (MySQL).
    pub async fn add_connection_with_factory(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
        factory: Arc<dyn DriverFactory>,
    ) {
        let name = name.into();
        self.note_meta(&name, &config);
        self.registry
            .add_connection_with_factory(name, config, factory)
            .await;
    }

    fn note_meta(&self, name: &str, config: &ConnectionConfig) {
        if let Ok(mut meta) = self.meta.write() {
            meta.insert(
                name.to_string(),
                ConnMeta {
                    dialect: config.dialect,
                    prefix: config.table_prefix.clone(),
                },
            );
        }
    }

    /// Start a query builder bound to the named connection.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ConnectionError`] for unregistered names.
    pub fn query(self: &Arc<Self>, connection: &str) -> Result<QueryBuilder, SqlFluentError> {
        let meta = self
            .meta
            .read()
            .ok()
            .and_then(|m| m.get(connection).cloned())
            .ok_or_else(|| {
                SqlFluentError::ConnectionError(format!("unknown connection: {connection}"))
            })?;
        Ok(QueryBuilder::new(self.clone(), connection.to_string(), meta))
    }

    /// Change the table prefix applied by builders created from now on.
    pub fn set_prefix(&self, connection: &str, prefix: Option<&str>) {
        if let Ok(mut meta) = self.meta.write()
            && let Some(entry) = meta.get_mut(connection)
        {
            entry.prefix = prefix.map(str::to_string);
        }
    }

    /// Run a batch of semicolon-separated statements outside the builder
    /// (schema setup, migrations).
    pub async fn execute_batch(&self, connection: &str, sql: &str) -> Result<(), SqlFluentError> {
        let conn = self.registry.connection(connection).await?;
        conn.execute_batch(sql).await
    }

    /// Liveness probe of one connection.
    pub async fn ping(&self, connection: &str) -> Result<(), SqlFluentError> {
        let conn = self.registry.connection(connection).await?;
        conn.ping().await
    }

    /// Server version string of one connection.
    pub async fn server_version(&self, connection: &str) -> Result<String, SqlFluentError> {
        let conn = self.registry.connection(connection).await?;
        conn.server_version().await
    }

    /// Tear down one connection. Its cached statements are closed first.
    pub async fn disconnect(&self, connection: &str) -> bool {
        self.cache.clear(Some(connection)).await;
        self.registry.disconnect(connection).await
    }

    /// Tear down every connection and the whole statement cache.
    pub async fn disconnect_all(&self) {
        self.cache.clear(None).await;
        self.registry.disconnect_all().await;
    }

    pub async fn is_connected(&self, connection: &str) -> bool {
        self.registry.is_connected(connection).await
    }

    /// Close cached prepared statements: one connection's, or all.
    pub async fn clear_statement_cache(&self, connection: Option<&str>) {
        self.cache.clear(connection).await;
    }

    /// Cached-statement counts per connection.
    pub async fn statement_cache_stats(&self) -> HashMap<String, usize> {
        self.cache.stats().await
    }

    /// The bounded trace of executed statements.
    #[must_use]
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// The security event monitor.
    #[must_use]
    pub fn security(&self) -> &SecurityMonitor {
        &self.monitor
    }

    pub(crate) fn engine(&self) -> Engine<'_> {
        Engine {
            registry: &self.registry,
            cache: &self.cache,
            trace: &self.trace,
        }
    }

    /// Whether INSERT ... ON DUPLICATE should use the `AS new_row` form
    /// (MySQL 8.0.20 deprecated `VALUES(col)`). Probed once per connection.
    pub(crate) async fn use_insert_alias(&self, connection: &str) -> bool {
        {
            let cache = self.insert_alias.lock().await;
            if let Some(&cached) = cache.get(connection) {
                return cached;
            }
        }
        let supported = match self.registry.connection(connection).await {
            Ok(conn) => conn
                .server_version()
                .await
                .map(|v| version_at_least(&v, (8, 0, 20)))
                .unwrap_or(false),
            Err(_) => false,
        };
        self.insert_alias
            .lock()
            .await
            .insert(connection.to_string(), supported);
        supported
    }
}
