use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "mssql")]
use tiberius;
#[cfg(feature = "postgres")]
use tokio_postgres;

/// Unified error type for building and executing statements.
///
/// Validation failures (`InvalidIdentifier`, `InvalidOperator`,
/// `UnsafeExpression`, ...) are raised before any SQL reaches a driver.
/// Driver failures are wrapped in [`SqlFluentError::Driver`] with the
/// backend's native code where one exists.
#[derive(Debug, Error)]
pub enum SqlFluentError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Unsafe expression rejected: {0}")]
    UnsafeExpression(String),

    #[error("Unsafe function rejected: {0}")]
    UnsafeFunction(String),

    #[error("Unsupported operation for this dialect: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    /// An error surfaced by the underlying driver, with its native code.
    #[error("Driver error{}: {message}", .code.map(|c| format!(" [{c}]")).unwrap_or_default())]
    Driver { code: Option<i64>, message: String },
}

impl SqlFluentError {
    /// Wrap a driver-native failure.
    #[must_use]
    pub fn driver(code: Option<i64>, message: impl Into<String>) -> Self {
        SqlFluentError::Driver {
            code,
            message: message.into(),
        }
    }

    /// The driver's native error code, when this error carries one.
    #[must_use]
    pub fn driver_code(&self) -> Option<i64> {
        match self {
            SqlFluentError::Driver { code, .. } => *code,
            _ => None,
        }
    }
}
