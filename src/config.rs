use crate::dialect::Dialect;

/// Default bound on reconnect attempts per connection.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Configuration for one named connection.
///
/// Created through the per-dialect constructors, tweaked through the
/// `with_*` builders, registered under a name in the
/// [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub charset: Option<String>,
    /// Unix socket (MySQL) or database file path (SQLite).
    pub socket_or_path: Option<String>,
    /// Table-name prefix applied to every statement built on this
    /// connection.
    pub table_prefix: Option<String>,
    /// Reconnect-and-retry once on transient connection loss.
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    fn base(dialect: Dialect) -> Self {
        ConnectionConfig {
            dialect,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            charset: None,
            socket_or_path: None,
            table_prefix: None,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// SQLite database at `path` (`:memory:` for in-memory).
    #[must_use]
    pub fn sqlite(path: impl Into<String>) -> Self {
        let mut config = Self::base(Dialect::Sqlite);
        config.socket_or_path = Some(path.into());
        config
    }

    /// MySQL server. A driver for this dialect is attached through a custom
    /// [`DriverFactory`](crate::driver::DriverFactory).
    #[must_use]
    pub fn mysql(host: impl Into<String>, database: impl Into<String>) -> Self {
        let mut config = Self::base(Dialect::MySql);
        config.host = Some(host.into());
        config.database = Some(database.into());
        config.port = Some(3306);
        config.charset = Some("utf8mb4".to_string());
        config
    }

    /// PostgreSQL server.
    #[must_use]
    pub fn postgres(host: impl Into<String>, database: impl Into<String>) -> Self {
        let mut config = Self::base(Dialect::Postgres);
        config.host = Some(host.into());
        config.database = Some(database.into());
        config.port = Some(5432);
        config
    }

    /// SQL Server instance.
    #[must_use]
    pub fn mssql(server: impl Into<String>, database: impl Into<String>) -> Self {
        let mut config = Self::base(Dialect::Mssql);
        config.host = Some(server.into());
        config.database = Some(database.into());
        config.port = Some(1433);
        config
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    #[must_use]
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket_or_path = Some(socket.into());
        self
    }

    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Render the connection descriptor for this dialect. Credentials are
    /// never included; they travel separately to the driver.
    #[must_use]
    pub fn dsn(&self) -> String {
        match self.dialect {
            Dialect::Sqlite => format!(
                "sqlite:{}",
                self.socket_or_path.as_deref().unwrap_or(":memory:")
            ),
            Dialect::MySql => {
                if let Some(socket) = &self.socket_or_path {
                    format!(
                        "mysql:unix_socket={socket};dbname={}",
                        self.database.as_deref().unwrap_or("")
                    )
                } else {
                    format!(
                        "mysql:host={};port={};dbname={};charset={}",
                        self.host.as_deref().unwrap_or("localhost"),
                        self.port.unwrap_or(3306),
                        self.database.as_deref().unwrap_or(""),
                        self.charset.as_deref().unwrap_or("utf8mb4"),
                    )
                }
            }
            Dialect::Postgres => format!(
                "pgsql:host={};port={};dbname={}",
                self.host.as_deref().unwrap_or("localhost"),
                self.port.unwrap_or(5432),
                self.database.as_deref().unwrap_or(""),
            ),
            Dialect::Mssql => format!(
                "sqlsrv:server={},{};database={}",
                self.host.as_deref().unwrap_or("localhost"),
                self.port.unwrap_or(1433),
                self.database.as_deref().unwrap_or(""),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_shapes_per_dialect() {
        assert_eq!(ConnectionConfig::sqlite(":memory:").dsn(), "sqlite::memory:");
        assert_eq!(
            ConnectionConfig::mysql("db.example.com", "app").dsn(),
            "mysql:host=db.example.com;port=3306;dbname=app;charset=utf8mb4"
        );
        assert_eq!(
            ConnectionConfig::mysql("ignored", "app")
                .with_socket("/var/run/mysqld.sock")
                .dsn(),
            "mysql:unix_socket=/var/run/mysqld.sock;dbname=app"
        );
        assert_eq!(
            ConnectionConfig::postgres("pg", "app").with_port(5433).dsn(),
            "pgsql:host=pg;port=5433;dbname=app"
        );
        assert_eq!(
            ConnectionConfig::mssql("sql01", "app").dsn(),
            "sqlsrv:server=sql01,1433;database=app"
        );
    }

    #[test]
    fn dsn_never_carries_credentials() {
        let config =
            ConnectionConfig::postgres("pg", "app").with_credentials("admin", "hunter2");
        assert!(!config.dsn().contains("hunter2"));
        assert!(!config.dsn().contains("admin"));
    }
}
