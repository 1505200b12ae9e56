//! Fluent, dialect-aware SQL access layer.
//!
//! A [`Db`] owns named connections, a per-connection prepared-statement
//! cache, and the trace/security instrumentation. Queries are built with
//! the chainable [`QueryBuilder`] obtained from [`Db::query`]; rendering
//! always emits `?` placeholders, which the executor rewrites to the
//! connection dialect's native style before preparing.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sql_fluent::{ConnectionConfig, Db, Fetched, SetValue};
//!
//! # async fn demo() -> Result<(), sql_fluent::SqlFluentError> {
//! let db = Arc::new(Db::new());
//! db.add_connection("default", ConnectionConfig::sqlite(":memory:")).await?;
//!
//! db.query("default")?
//!     .insert("users", &[("name", SetValue::of("alice")), ("logins", SetValue::of(1))])
//!     .await?;
//!
//! let rows = db
//!     .query("default")?
//!     .where_eq("name", "alice")?
//!     .get("users")
//!     .await?;
//! if let Fetched::Rows(rows) = rows {
//!     assert_eq!(rows.len(), 1);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
mod clause;
pub mod config;
pub mod db;
pub mod dialect;
pub mod driver;
pub mod error;
mod executor;
pub mod expr;
pub mod ident;
pub mod prelude;
mod registry;
mod render;
pub mod results;
pub mod safety;
pub mod stmt_cache;
mod transaction;
pub mod translation;
pub mod value;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use builder::QueryBuilder;
pub use config::ConnectionConfig;
pub use db::Db;
pub use dialect::Dialect;
pub use driver::{DriverConnection, DriverFactory, DriverStatement};
pub use error::SqlFluentError;
pub use expr::SetValue;
pub use results::{Fetched, ResultSet, ReturnType, Row};
pub use safety::{SecurityEventKind, SecurityMonitor, TraceLog};
pub use value::Value;
