use crate::error::SqlFluentError;
use crate::value::Value;

/// Comparison operators accepted by `where`/`having`. Anything else is
/// rejected with `InvalidOperator` before touching builder state.
pub const ALLOWED_OPERATORS: &[&str] = &[
    "=",
    "!=",
    "<>",
    "<",
    ">",
    "<=",
    ">=",
    "LIKE",
    "NOT LIKE",
    "IN",
    "NOT IN",
    "BETWEEN",
    "NOT BETWEEN",
    "IS",
    "IS NOT",
    "EXISTS",
    "NOT EXISTS",
    "REGEXP",
    "NOT REGEXP",
    "RLIKE",
    "NOT RLIKE",
];

/// Join types accepted by `join`. The empty string means a bare JOIN.
pub const ALLOWED_JOIN_TYPES: &[&str] = &[
    "", "LEFT", "RIGHT", "OUTER", "INNER", "LEFT OUTER", "RIGHT OUTER", "NATURAL",
];

/// SELECT/DML keyword options accepted by `set_query_option`.
pub const ALLOWED_QUERY_OPTIONS: &[&str] = &[
    "ALL",
    "DISTINCT",
    "DISTINCTROW",
    "HIGH_PRIORITY",
    "STRAIGHT_JOIN",
    "SQL_SMALL_RESULT",
    "SQL_BIG_RESULT",
    "SQL_BUFFER_RESULT",
    "SQL_CACHE",
    "SQL_NO_CACHE",
    "SQL_CALC_FOUND_ROWS",
    "LOW_PRIORITY",
    "IGNORE",
    "QUICK",
    "FOR UPDATE",
    "LOCK IN SHARE MODE",
];

/// Normalize and validate an operator against the allow-list.
pub fn validate_operator(op: &str) -> Result<String, SqlFluentError> {
    let normalized = op.trim().to_uppercase();
    let candidate = if normalized.is_empty() { "=" } else { normalized.as_str() };
    if ALLOWED_OPERATORS.contains(&candidate) {
        Ok(candidate.to_string())
    } else {
        Err(SqlFluentError::InvalidOperator(op.to_string()))
    }
}

/// Normalize and validate a join type.
pub fn validate_join_type(join_type: &str) -> Result<String, SqlFluentError> {
    let normalized = join_type.trim().to_uppercase();
    if ALLOWED_JOIN_TYPES.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(SqlFluentError::InvalidArgument(format!(
            "unknown join type: {join_type}"
        )))
    }
}

/// How a condition chains onto the previous one. The first entry of each
/// clause list always carries `Connector::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    None,
    And,
    Or,
}

impl Connector {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Connector::None => "",
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// The right-hand side of a condition. "No value supplied" is a structural
/// variant here, never a sentinel value.
#[derive(Debug, Clone, PartialEq)]
pub enum CondRhs {
    /// Value-less predicate (`WHERE deleted_at IS NULL` built via raw/expr
    /// helpers, `EXISTS (...)`, ...).
    None,
    /// Single comparison value.
    One(Value),
    /// List for IN / NOT IN.
    Many(Vec<Value>),
    /// Pair for BETWEEN / NOT BETWEEN.
    Range(Value, Value),
}

/// One accumulated WHERE or HAVING entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub connector: Connector,
    /// Escaped field path for non-raw entries; validated raw SQL otherwise.
    pub lhs: String,
    pub operator: String,
    pub rhs: CondRhs,
    pub raw: bool,
}

/// What a join attaches to.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    /// A (prefixed, unescaped) table name.
    Table(String),
    /// A rendered subquery spliced in parentheses.
    Subquery { sql: String, params: Vec<Value> },
}

impl JoinTarget {
    /// Key used to attach `join_where` predicates to this join.
    #[must_use]
    pub fn key<'a>(&'a self, alias: Option<&'a str>) -> &'a str {
        if let Some(alias) = alias {
            return alias;
        }
        match self {
            JoinTarget::Table(name) => name,
            JoinTarget::Subquery { sql, .. } => sql,
        }
    }
}

/// One accumulated JOIN entry. The ON condition string is trusted as-is;
/// that trust boundary is the caller's (documented on the builder).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: String,
    pub target: JoinTarget,
    pub condition: String,
    pub alias: Option<String>,
    /// Extra predicates rendered right after this join's ON clause.
    pub extra_conditions: Vec<Condition>,
}

/// Sort direction for ORDER BY entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn parse(direction: &str) -> Result<Self, SqlFluentError> {
        match direction.trim().to_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            other => Err(SqlFluentError::InvalidArgument(format!(
                "order direction must be ASC or DESC, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY entry. Variants needing the dialect (random function) or
/// the driver's literal quoting (FIELD lists, REGEXP patterns) resolve at
/// render time.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEntry {
    /// `expr ASC|DESC` over an already-escaped field expression.
    Plain {
        expr: String,
        direction: OrderDirection,
    },
    /// `FIELD(col, v1, v2, ...) ASC|DESC`, values quoted by the driver.
    Field {
        expr: String,
        values: Vec<Value>,
        direction: OrderDirection,
    },
    /// `col REGEXP 'pattern'`, pattern quoted by the driver.
    Regexp { expr: String, pattern: String },
    /// The dialect's random ordering function, no direction.
    Random,
}

/// Locking suffix requested through query options (MySQL-only at render).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
    ShareMode,
}

/// Validate one query-option keyword, routing the two locking options to
/// their dedicated flag.
pub fn parse_query_option(option: &str) -> Result<ParsedOption, SqlFluentError> {
    let normalized = option.trim().to_uppercase();
    match normalized.as_str() {
        "FOR UPDATE" => Ok(ParsedOption::Lock(LockMode::ForUpdate)),
        "LOCK IN SHARE MODE" => Ok(ParsedOption::Lock(LockMode::ShareMode)),
        other if ALLOWED_QUERY_OPTIONS.contains(&other) => {
            Ok(ParsedOption::Keyword(other.to_string()))
        }
        _ => Err(SqlFluentError::InvalidArgument(format!(
            "unknown query option: {option}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOption {
    Keyword(String),
    Lock(LockMode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_allow_list() {
        assert_eq!(validate_operator("=").unwrap(), "=");
        assert_eq!(validate_operator("not like").unwrap(), "NOT LIKE");
        assert_eq!(validate_operator("").unwrap(), "=");
        assert!(matches!(
            validate_operator("SOUNDS LIKE"),
            Err(SqlFluentError::InvalidOperator(_))
        ));
        assert!(matches!(
            validate_operator("= 1 OR 1"),
            Err(SqlFluentError::InvalidOperator(_))
        ));
    }

    #[test]
    fn connector_spellings() {
        assert_eq!(Connector::And.as_sql(), "AND");
        assert_eq!(Connector::Or.as_sql(), "OR");
        assert_eq!(Connector::None.as_sql(), "");
    }

    #[test]
    fn join_type_allow_list() {
        assert_eq!(validate_join_type("left").unwrap(), "LEFT");
        assert_eq!(validate_join_type("").unwrap(), "");
        assert!(validate_join_type("CROSS APPLY").is_err());
    }

    #[test]
    fn query_option_routing() {
        assert_eq!(
            parse_query_option("for update").unwrap(),
            ParsedOption::Lock(LockMode::ForUpdate)
        );
        assert_eq!(
            parse_query_option("SQL_NO_CACHE").unwrap(),
            ParsedOption::Keyword("SQL_NO_CACHE".to_string())
        );
        assert!(parse_query_option("OPTIMIZER_HINT").is_err());
    }
}
