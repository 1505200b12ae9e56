use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::dialect::Dialect;
use crate::error::SqlFluentError;

/// Maximum identifier length accepted by `is_valid_identifier`.
pub const MAX_IDENTIFIER_LEN: usize = 64;

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Reserved words that trigger a warning (never a rejection) when used as
/// table or column names.
pub const RESERVED_WORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TABLE", "INDEX", "WHERE",
    "FROM", "JOIN", "UNION", "ORDER", "GROUP", "HAVING", "LIMIT", "OFFSET", "AND", "OR", "NOT",
    "NULL", "INTO", "VALUES", "SET", "AS", "ON", "IN", "BETWEEN", "LIKE", "EXISTS", "KEY",
    "PRIMARY", "FOREIGN", "REFERENCES", "GRANT", "REVOKE", "TRUNCATE", "EXEC", "EXECUTE",
];

fn is_already_quoted(name: &str, dialect: Dialect) -> bool {
    let open = dialect.quote_open();
    let close = dialect.quote_close();
    name.len() >= 2 && name.starts_with(open) && name.ends_with(close)
}

/// Escape a table or column identifier for the given dialect.
///
/// Handles `*`, `table.*`, dotted `table.column` paths (escaped
/// component-wise) and passes already-quoted names through untouched.
///
/// # Errors
/// Returns [`SqlFluentError::InvalidIdentifier`] when any component is not a
/// plain `[A-Za-z_][A-Za-z0-9_]*` name.
pub fn escape(name: &str, dialect: Dialect) -> Result<String, SqlFluentError> {
    if name == "*" {
        return Ok(name.to_string());
    }
    if is_already_quoted(name, dialect) {
        return Ok(name.to_string());
    }

    let mut parts = Vec::new();
    for component in name.split('.') {
        if component == "*" {
            // table.* is the only position where a bare star may follow a dot
            parts.push("*".to_string());
            continue;
        }
        if is_already_quoted(component, dialect) {
            parts.push(component.to_string());
            continue;
        }
        if !IDENT_RE.is_match(component) {
            return Err(SqlFluentError::InvalidIdentifier(name.to_string()));
        }
        parts.push(dialect.quote_component(component));
    }
    Ok(parts.join("."))
}

/// What an identifier is being used as, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Table,
    Column,
    Alias,
}

impl IdentifierKind {
    fn label(self) -> &'static str {
        match self {
            IdentifierKind::Table => "table",
            IdentifierKind::Column => "column",
            IdentifierKind::Alias => "alias",
        }
    }
}

/// Syntactic check used ahead of escaping: pattern match plus length bound.
///
/// Reserved-word usage is logged but not rejected; some schemas genuinely
/// carry columns named `key` or `order`.
#[must_use]
pub fn is_valid_identifier(name: &str, kind: IdentifierKind) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    for component in name.split('.') {
        if component == "*" && kind == IdentifierKind::Column {
            continue;
        }
        if !IDENT_RE.is_match(component) {
            return false;
        }
        if RESERVED_WORDS
            .iter()
            .any(|w| w.eq_ignore_ascii_case(component))
        {
            warn!(
                identifier = name,
                kind = kind.label(),
                "reserved word used as identifier"
            );
        }
    }
    true
}
