//! Statement assembly: clause state in, SQL text plus ordered bind
//! parameters out.
//!
//! Everything here renders `?` placeholders regardless of dialect; the
//! execution engine rewrites them per backend (see
//! [`translation`](crate::translation)). Splice-time values (`Value::Column`,
//! `Value::Subquery`) are resolved into the text here and never reach the
//! bind list.

use crate::clause::{CondRhs, Condition, JoinTarget, LockMode, OrderEntry};
use crate::dialect::Dialect;
use crate::error::SqlFluentError;
use crate::expr::SetValue;
use crate::ident;
use crate::value::Value;

/// Driver-supplied literal quoting, used only where a value must be inlined
/// (FIELD lists, REGEXP patterns).
pub(crate) type Quoter<'a> = &'a dyn Fn(&str) -> String;

/// Accumulated, renderable clause state for one statement.
///
/// The builder owns one of these and resets it after every terminal
/// operation. `table` is prefixed but unescaped; `group_by` entries and join
/// ON conditions are stored as rendered text.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    pub table: String,
    pub columns: Vec<String>,
    pub options: Vec<String>,
    pub lock: LockMode,
    pub joins: Vec<crate::clause::JoinClause>,
    pub wheres: Vec<Condition>,
    pub group_by: Vec<String>,
    pub havings: Vec<Condition>,
    pub order_by: Vec<OrderEntry>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Column list plus value rows for INSERT / REPLACE. Every row must be as
/// wide as `columns`.
#[derive(Debug, Clone)]
pub(crate) struct InsertPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SetValue>>,
}

/// ON DUPLICATE KEY UPDATE directives (MySQL only).
#[derive(Debug, Clone)]
pub(crate) struct OnDuplicate {
    /// Columns to update on conflict. `None` takes the value from the
    /// attempted insert; `Some` overrides it.
    pub updates: Vec<(String, Option<SetValue>)>,
    /// Column routed through `LAST_INSERT_ID(col)` so the caller can read
    /// the existing row's id after an update path.
    pub last_insert_id: Option<String>,
}

/// Render a SELECT statement.
///
/// Clause order is fixed: options and columns, FROM, joins (with their
/// attached predicates), WHERE, GROUP BY, HAVING, ORDER BY, LIMIT/OFFSET,
/// locking suffix. SQL Server gets a synthesized `ORDER BY (SELECT NULL)`
/// when a limit is present without ordering.
pub(crate) fn render_select(
    state: &QueryState,
    dialect: Dialect,
    quote: Quoter<'_>,
) -> Result<(String, Vec<Value>), SqlFluentError> {
    let mut params = Vec::new();
    let mut sql = String::from("SELECT ");
    for option in &state.options {
        sql.push_str(option);
        sql.push(' ');
    }
    if state.columns.is_empty() {
        sql.push('*');
    } else {
        let rendered: Vec<String> = state
            .columns
            .iter()
            .map(|column| column_expr(column, dialect))
            .collect();
        sql.push_str(&rendered.join(", "));
    }
    sql.push_str(" FROM ");
    sql.push_str(&ident::escape(&state.table, dialect)?);

    render_joins(state, dialect, &mut sql, &mut params)?;
    render_condition_block("WHERE", &state.wheres, dialect, &mut sql, &mut params)?;
    if !state.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&state.group_by.join(", "));
    }
    render_condition_block("HAVING", &state.havings, dialect, &mut sql, &mut params)?;

    if !state.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&render_order_entries(&state.order_by, dialect, quote));
    }
    if let Some(limit) = state.limit {
        if dialect.needs_order_by_for_limit() && state.order_by.is_empty() {
            sql.push_str(" ORDER BY (SELECT NULL)");
        }
        sql.push_str(&dialect.render_limit(limit, state.offset));
    }
    match state.lock {
        LockMode::None => {}
        LockMode::ForUpdate => sql.push_str(" FOR UPDATE"),
        LockMode::ShareMode => sql.push_str(" LOCK IN SHARE MODE"),
    }
    Ok((sql, params))
}

/// Render the total-count sidecar for a SELECT.
///
/// Plain queries are rewritten directly to `SELECT COUNT(*)`; anything with
/// grouping, HAVING or DISTINCT is wrapped as a derived table so the count
/// reflects the post-aggregation row set. LIMIT/OFFSET and ordering are
/// dropped either way.
pub(crate) fn render_count(
    state: &QueryState,
    dialect: Dialect,
    quote: Quoter<'_>,
) -> Result<(String, Vec<Value>), SqlFluentError> {
    let mut inner = state.clone();
    inner.limit = None;
    inner.offset = None;
    inner.order_by.clear();
    inner.lock = LockMode::None;

    let needs_wrap = !state.group_by.is_empty()
        || !state.havings.is_empty()
        || state
            .options
            .iter()
            .any(|option| option == "DISTINCT" || option == "DISTINCTROW");
    if needs_wrap {
        let (sub, params) = render_select(&inner, dialect, quote)?;
        Ok((format!("SELECT COUNT(*) FROM ({sub}) AS count_wrap"), params))
    } else {
        inner.columns = vec!["COUNT(*)".to_string()];
        render_select(&inner, dialect, quote)
    }
}

/// Render an INSERT (or REPLACE when `replace` is set; the builder guards
/// that to MySQL). `use_insert_alias` picks the `AS new_row` conflict form
/// over the deprecated `VALUES(col)` one.
pub(crate) fn render_insert(
    table: &str,
    payload: &InsertPayload,
    options: &[String],
    on_duplicate: Option<&OnDuplicate>,
    use_insert_alias: bool,
    replace: bool,
    dialect: Dialect,
) -> Result<(String, Vec<Value>), SqlFluentError> {
    if payload.rows.is_empty() || payload.columns.is_empty() {
        return Err(SqlFluentError::InvalidArgument(
            "insert requires at least one row and one column".to_string(),
        ));
    }
    let mut params = Vec::new();
    let mut sql = String::from(if replace { "REPLACE" } else { "INSERT" });
    for option in options {
        sql.push(' ');
        sql.push_str(option);
    }
    sql.push_str(" INTO ");
    sql.push_str(&ident::escape(table, dialect)?);
    sql.push_str(" (");
    let columns = payload
        .columns
        .iter()
        .map(|column| ident::escape(column, dialect))
        .collect::<Result<Vec<_>, _>>()?;
    sql.push_str(&columns.join(", "));
    sql.push_str(") VALUES ");

    let mut rows = Vec::with_capacity(payload.rows.len());
    for row in &payload.rows {
        if row.len() != payload.columns.len() {
            return Err(SqlFluentError::InvalidArgument(format!(
                "insert row has {} values for {} columns",
                row.len(),
                payload.columns.len()
            )));
        }
        let mut cells = Vec::with_capacity(row.len());
        for (column, value) in columns.iter().zip(row) {
            cells.push(value_cell(column, value, dialect, &mut params)?);
        }
        rows.push(format!("({})", cells.join(", ")));
    }
    sql.push_str(&rows.join(", "));

    if let Some(dup) = on_duplicate {
        if use_insert_alias {
            sql.push_str(" AS new_row");
        }
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        let mut items = Vec::with_capacity(dup.updates.len() + 1);
        if let Some(id_column) = &dup.last_insert_id {
            let column = ident::escape(id_column, dialect)?;
            items.push(format!("{column} = LAST_INSERT_ID({column})"));
        }
        for (name, value) in &dup.updates {
            let column = ident::escape(name, dialect)?;
            match value {
                Some(set) => {
                    let cell = value_cell(&column, set, dialect, &mut params)?;
                    items.push(format!("{column} = {cell}"));
                }
                None if use_insert_alias => {
                    items.push(format!("{column} = new_row.{column}"));
                }
                None => items.push(format!("{column} = VALUES({column})")),
            }
        }
        sql.push_str(&items.join(", "));
    }
    Ok((sql, params))
}

/// Render an UPDATE. ORDER BY and LIMIT tails are MySQL extensions and are
/// rendered only there.
pub(crate) fn render_update(
    state: &QueryState,
    data: &[(String, SetValue)],
    dialect: Dialect,
    quote: Quoter<'_>,
) -> Result<(String, Vec<Value>), SqlFluentError> {
    if data.is_empty() {
        return Err(SqlFluentError::InvalidArgument(
            "update requires at least one assignment".to_string(),
        ));
    }
    let mut params = Vec::new();
    let mut sql = String::from("UPDATE ");
    for option in &state.options {
        sql.push_str(option);
        sql.push(' ');
    }
    sql.push_str(&ident::escape(&state.table, dialect)?);
    sql.push_str(" SET ");
    let mut assignments = Vec::with_capacity(data.len());
    for (name, value) in data {
        let column = ident::escape(name, dialect)?;
        let cell = value_cell(&column, value, dialect, &mut params)?;
        assignments.push(format!("{column} = {cell}"));
    }
    sql.push_str(&assignments.join(", "));
    render_condition_block("WHERE", &state.wheres, dialect, &mut sql, &mut params)?;
    render_mysql_dml_tail(state, dialect, quote, &mut sql);
    Ok((sql, params))
}

/// Render a DELETE. Same MySQL-only tail rules as UPDATE.
pub(crate) fn render_delete(
    state: &QueryState,
    dialect: Dialect,
    quote: Quoter<'_>,
) -> Result<(String, Vec<Value>), SqlFluentError> {
    let mut params = Vec::new();
    let mut sql = String::from("DELETE ");
    for option in &state.options {
        sql.push_str(option);
        sql.push(' ');
    }
    sql.push_str("FROM ");
    sql.push_str(&ident::escape(&state.table, dialect)?);
    render_condition_block("WHERE", &state.wheres, dialect, &mut sql, &mut params)?;
    render_mysql_dml_tail(state, dialect, quote, &mut sql);
    Ok((sql, params))
}

fn render_mysql_dml_tail(
    state: &QueryState,
    dialect: Dialect,
    quote: Quoter<'_>,
    sql: &mut String,
) {
    if dialect != Dialect::MySql {
        return;
    }
    if !state.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&render_order_entries(&state.order_by, dialect, quote));
    }
    if let Some(limit) = state.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
}

/// A SELECT column is escaped when it is a plain (possibly dotted) name and
/// passed through untouched otherwise; expressions like `COUNT(*) AS n` are
/// the caller's trust boundary, screened by the builder.
fn column_expr(column: &str, dialect: Dialect) -> String {
    ident::escape(column, dialect).unwrap_or_else(|_| column.to_string())
}

fn render_joins(
    state: &QueryState,
    dialect: Dialect,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<(), SqlFluentError> {
    for join in &state.joins {
        sql.push(' ');
        if !join.join_type.is_empty() {
            sql.push_str(&join.join_type);
            sql.push(' ');
        }
        sql.push_str("JOIN ");
        match &join.target {
            JoinTarget::Table(name) => sql.push_str(&ident::escape(name, dialect)?),
            JoinTarget::Subquery {
                sql: sub,
                params: sub_params,
            } => {
                sql.push('(');
                sql.push_str(sub);
                sql.push(')');
                params.extend(sub_params.iter().cloned());
            }
        }
        if let Some(alias) = &join.alias {
            sql.push_str(" AS ");
            sql.push_str(&ident::escape(alias, dialect)?);
        }
        sql.push_str(" ON ");
        sql.push_str(&join.condition);
        for cond in &join.extra_conditions {
            sql.push(' ');
            sql.push_str(cond.connector.as_sql());
            sql.push(' ');
            sql.push_str(&condition_fragment(cond, dialect, params)?);
        }
    }
    Ok(())
}

fn render_condition_block(
    keyword: &str,
    conditions: &[Condition],
    dialect: Dialect,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<(), SqlFluentError> {
    if conditions.is_empty() {
        return Ok(());
    }
    sql.push(' ');
    sql.push_str(keyword);
    sql.push(' ');
    for (i, cond) in conditions.iter().enumerate() {
        if i > 0 {
            sql.push(' ');
            sql.push_str(cond.connector.as_sql());
            sql.push(' ');
        }
        sql.push_str(&condition_fragment(cond, dialect, params)?);
    }
    Ok(())
}

fn condition_fragment(
    cond: &Condition,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String, SqlFluentError> {
    if cond.raw {
        // Validated raw SQL; parenthesized so OR chaining stays unambiguous.
        match &cond.rhs {
            CondRhs::None => {}
            CondRhs::One(value) => params.push(value.clone()),
            CondRhs::Many(values) => params.extend(values.iter().cloned()),
            CondRhs::Range(low, high) => {
                params.push(low.clone());
                params.push(high.clone());
            }
        }
        return Ok(format!("({})", cond.lhs));
    }

    let op = cond.operator.as_str();
    match (&cond.rhs, op) {
        (CondRhs::None, "IS" | "IS NOT") => Ok(format!("{} {op} NULL", cond.lhs)),
        (CondRhs::None, _) => Ok(cond.lhs.clone()),
        (CondRhs::One(Value::Null), "=" | "IS") => Ok(format!("{} IS NULL", cond.lhs)),
        (CondRhs::One(Value::Null), "!=" | "<>" | "IS NOT") => {
            Ok(format!("{} IS NOT NULL", cond.lhs))
        }
        (CondRhs::One(value), "EXISTS" | "NOT EXISTS") => {
            let rendered = placement(value, dialect, params)?;
            if cond.lhs.is_empty() {
                Ok(format!("{op} {rendered}"))
            } else {
                Ok(format!("{} {op} {rendered}", cond.lhs))
            }
        }
        (CondRhs::One(value), _) => {
            let rendered = placement(value, dialect, params)?;
            Ok(format!("{} {op} {rendered}", cond.lhs))
        }
        (CondRhs::Many(values), _) => {
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                items.push(placement(value, dialect, params)?);
            }
            Ok(format!("{} {op} ({})", cond.lhs, items.join(", ")))
        }
        (CondRhs::Range(low, high), _) => {
            let low = placement(low, dialect, params)?;
            let high = placement(high, dialect, params)?;
            Ok(format!("{} {op} {low} AND {high}", cond.lhs))
        }
    }
}

/// Resolve one value position: columns splice as escaped identifiers,
/// subqueries as parenthesized fragments, everything else becomes a `?`.
fn placement(
    value: &Value,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String, SqlFluentError> {
    match value {
        Value::Column(name) => ident::escape(name, dialect),
        Value::Subquery(sub) => {
            params.extend(sub.params.iter().cloned());
            Ok(format!("({})", sub.sql))
        }
        other => {
            params.push(other.clone());
            Ok("?".to_string())
        }
    }
}

fn value_cell(
    column: &str,
    value: &SetValue,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String, SqlFluentError> {
    match value {
        SetValue::Assign(v) => placement(v, dialect, params),
        SetValue::Increment(delta) => Ok(format!("{column} + {delta}")),
        SetValue::Decrement(delta) => Ok(format!("{column} - {delta}")),
        SetValue::Negate(None) => Ok(format!("NOT {column}")),
        SetValue::Negate(Some(other)) => Ok(format!("NOT {}", ident::escape(other, dialect)?)),
        SetValue::Func {
            expr,
            params: fn_params,
        } => {
            params.extend(fn_params.iter().cloned());
            Ok(expr.clone())
        }
    }
}

fn render_order_entries(entries: &[OrderEntry], dialect: Dialect, quote: Quoter<'_>) -> String {
    entries
        .iter()
        .map(|entry| match entry {
            OrderEntry::Plain { expr, direction } => format!("{expr} {}", direction.as_sql()),
            OrderEntry::Field {
                expr,
                values,
                direction,
            } => {
                let list = values
                    .iter()
                    .map(|value| quote_literal(value, quote))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("FIELD ({expr}, {list}) {}", direction.as_sql())
            }
            OrderEntry::Regexp { expr, pattern } => {
                format!("{expr} REGEXP {}", quote(pattern))
            }
            OrderEntry::Random => dialect.random_function().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_literal(value: &Value, quote: Quoter<'_>) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => quote(&other.key_string()),
    }
}
