use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverFactory};
use crate::error::SqlFluentError;

struct Slot {
    config: ConnectionConfig,
    factory: Arc<dyn DriverFactory>,
    handle: Option<Arc<dyn DriverConnection>>,
    reconnect_attempts: u32,
}

/// Named connection configs mapped to lazily-connected driver handles.
///
/// An explicit, injectable object rather than process-global state: tests
/// construct independent registries. Each slot owns zero or one live handle;
/// connecting happens on first use, teardown on `disconnect`/
/// `disconnect_all`. Pooling of physical connections, where wanted, belongs
/// to the driver behind the handle.
pub struct ConnectionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn bundled_factory(dialect: Dialect) -> Result<Arc<dyn DriverFactory>, SqlFluentError> {
    match dialect {
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => Ok(Arc::new(crate::sqlite::SqliteFactory)),
        #[cfg(feature = "postgres")]
        Dialect::Postgres => Ok(Arc::new(crate::postgres::PostgresFactory)),
        #[cfg(feature = "mssql")]
        Dialect::Mssql => Ok(Arc::new(crate::mssql::MssqlFactory)),
        Dialect::MySql => Err(SqlFluentError::ConfigError(
            "no bundled driver for the MySql dialect; register one with add_connection_with_factory"
                .to_string(),
        )),
        #[allow(unreachable_patterns)]
        other => Err(SqlFluentError::ConfigError(format!(
            "driver support for {other:?} is not enabled in this build"
        ))),
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        ConnectionRegistry {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a named connection using the bundled driver for its dialect.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ConfigError`] when no bundled driver exists
    /// for the dialect (MySQL, or a feature-disabled backend).
    pub async fn add_connection(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Result<(), SqlFluentError> {
        let factory = bundled_factory(config.dialect)?;
        self.add_connection_with_factory(name, config, factory).await;
        Ok(())
    }

    /// Register a named connection with an externally supplied driver
    /// factory. This is the seam for clients the crate does not bundle.
    pub async fn add_connection_with_factory(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
        factory: Arc<dyn DriverFactory>,
    ) {
        let mut slots = self.slots.lock().await;
        slots.insert(
            name.into(),
            Slot {
                config,
                factory,
                handle: None,
                reconnect_attempts: 0,
            },
        );
    }

    /// The live handle for `name`, connecting lazily on first use.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ConnectionError`] for unknown names and
    /// propagates driver connect failures.
    pub async fn connection(
        &self,
        name: &str,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(name).ok_or_else(|| {
            SqlFluentError::ConnectionError(format!("unknown connection: {name}"))
        })?;
        if let Some(handle) = &slot.handle {
            return Ok(handle.clone());
        }
        debug!(connection = name, dsn = %slot.config.dsn(), "connecting");
        let handle = slot.factory.connect(&slot.config).await?;
        slot.handle = Some(handle.clone());
        Ok(handle)
    }

    /// The registered config for `name`.
    pub async fn config(&self, name: &str) -> Result<ConnectionConfig, SqlFluentError> {
        let slots = self.slots.lock().await;
        slots.get(name).map(|slot| slot.config.clone()).ok_or_else(|| {
            SqlFluentError::ConnectionError(format!("unknown connection: {name}"))
        })
    }

    /// Drop the live handle and connect a fresh one. Used by the execution
    /// engine's connection-loss retry path.
    pub async fn reconnect(
        &self,
        name: &str,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(name).ok_or_else(|| {
            SqlFluentError::ConnectionError(format!("unknown connection: {name}"))
        })?;
        slot.handle = None;
        debug!(connection = name, "reconnecting");
        let handle = slot.factory.connect(&slot.config).await?;
        slot.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Bump and return the reconnect-attempt counter for `name`.
    pub async fn note_reconnect_attempt(&self, name: &str) -> u32 {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(name) {
            Some(slot) => {
                slot.reconnect_attempts += 1;
                slot.reconnect_attempts
            }
            None => 0,
        }
    }

    /// Clear the reconnect counter after a successful recovery.
    pub async fn reset_reconnect_attempts(&self, name: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(name) {
            slot.reconnect_attempts = 0;
        }
    }

    /// Tear down one connection's handle. Returns whether a handle existed.
    pub async fn disconnect(&self, name: &str) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(name) {
            Some(slot) => slot.handle.take().is_some(),
            None => false,
        }
    }

    /// Tear down every live handle, keeping the configs registered.
    pub async fn disconnect_all(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            slot.handle = None;
        }
    }

    /// Whether `name` currently holds a live handle.
    pub async fn is_connected(&self, name: &str) -> bool {
        let slots = self.slots.lock().await;
        slots.get(name).is_some_and(|slot| slot.handle.is_some())
    }

    /// Registered connection names.
    pub async fn names(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        slots.keys().cloned().collect()
    }
}
