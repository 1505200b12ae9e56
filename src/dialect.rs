use clap::ValueEnum;

use crate::error::SqlFluentError;

/// Placeholder style expected by a backend's wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Bare `?` placeholders (MySQL, SQLite).
    Question,
    /// Numbered `$1` placeholders (PostgreSQL).
    Dollar,
    /// Named `@P1` placeholders (SQL Server).
    AtP,
}

/// The SQL dialect spoken by a connection.
///
/// Dialects differ in identifier quoting, LIMIT rendering, the random
/// ordering function, savepoint syntax, and which MySQL-only statements
/// they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Dialect {
    /// MySQL / MariaDB
    MySql,
    /// PostgreSQL
    Postgres,
    /// SQLite
    Sqlite,
    /// Microsoft SQL Server
    Mssql,
}

impl Dialect {
    /// The character opening a quoted identifier.
    #[must_use]
    pub fn quote_open(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres | Dialect::Sqlite => '"',
            Dialect::Mssql => '[',
        }
    }

    /// The character closing a quoted identifier.
    #[must_use]
    pub fn quote_close(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres | Dialect::Sqlite => '"',
            Dialect::Mssql => ']',
        }
    }

    /// Quote a single identifier component, doubling embedded quote chars.
    #[must_use]
    pub fn quote_component(self, part: &str) -> String {
        let close = self.quote_close();
        let doubled = part.replace(close, &format!("{close}{close}"));
        format!("{}{}{}", self.quote_open(), doubled, close)
    }

    /// The dialect's random-ordering function.
    #[must_use]
    pub fn random_function(self) -> &'static str {
        match self {
            Dialect::MySql => "RAND()",
            Dialect::Postgres | Dialect::Sqlite => "RANDOM()",
            Dialect::Mssql => "NEWID()",
        }
    }

    /// Placeholder style of the dialect's native drivers.
    #[must_use]
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Dialect::MySql | Dialect::Sqlite => PlaceholderStyle::Question,
            Dialect::Postgres => PlaceholderStyle::Dollar,
            Dialect::Mssql => PlaceholderStyle::AtP,
        }
    }

    /// Render the LIMIT/OFFSET tail.
    ///
    /// SQL Server uses `OFFSET .. ROWS FETCH NEXT .. ROWS ONLY`, which is
    /// only legal after an ORDER BY; [`Dialect::needs_order_by_for_limit`]
    /// tells the renderer to synthesize `ORDER BY (SELECT NULL)` when the
    /// query has none.
    #[must_use]
    pub fn render_limit(self, limit: u64, offset: Option<u64>) -> String {
        match self {
            Dialect::Mssql => {
                let skip = offset.unwrap_or(0);
                format!(" OFFSET {skip} ROWS FETCH NEXT {limit} ROWS ONLY")
            }
            _ => match offset {
                Some(skip) => format!(" LIMIT {limit} OFFSET {skip}"),
                None => format!(" LIMIT {limit}"),
            },
        }
    }

    #[must_use]
    pub fn needs_order_by_for_limit(self) -> bool {
        matches!(self, Dialect::Mssql)
    }

    /// SQL issuing a savepoint inside an open transaction.
    #[must_use]
    pub fn savepoint_sql(self, name: &str) -> String {
        match self {
            Dialect::Mssql => format!("SAVE TRANSACTION {name}"),
            _ => format!("SAVEPOINT {name}"),
        }
    }

    /// SQL releasing a savepoint. SQL Server auto-releases, so `None` there.
    #[must_use]
    pub fn release_savepoint_sql(self, name: &str) -> Option<String> {
        match self {
            Dialect::Mssql => None,
            _ => Some(format!("RELEASE SAVEPOINT {name}")),
        }
    }

    /// SQL rolling back to a savepoint.
    #[must_use]
    pub fn rollback_savepoint_sql(self, name: &str) -> String {
        match self {
            Dialect::Mssql => format!("ROLLBACK TRANSACTION {name}"),
            _ => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }

    /// Whether MySQL-only statements (REPLACE INTO, LOCK TABLES,
    /// ON DUPLICATE KEY UPDATE) are accepted.
    #[must_use]
    pub fn supports_mysql_extensions(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Guard a MySQL-only feature, naming it in the error.
    pub fn require_mysql(self, feature: &str) -> Result<(), SqlFluentError> {
        if self.supports_mysql_extensions() {
            Ok(())
        } else {
            Err(SqlFluentError::UnsupportedOperation(format!(
                "{feature} is only available on MySQL (dialect is {self:?})"
            )))
        }
    }
}
