//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::builder::QueryBuilder;
pub use crate::config::ConnectionConfig;
pub use crate::db::Db;
pub use crate::dialect::{Dialect, PlaceholderStyle};
pub use crate::driver::{DriverConnection, DriverFactory, DriverStatement};
pub use crate::error::SqlFluentError;
pub use crate::expr::SetValue;
pub use crate::results::{Fetched, ResultSet, ReturnType, Row};
pub use crate::safety::{SecurityEventKind, SecurityMonitor, TraceLog};
pub use crate::translation::number_placeholders;
pub use crate::value::Value;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteFactory;

#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresFactory;

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlClient, MssqlFactory};
