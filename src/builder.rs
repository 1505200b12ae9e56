//! The fluent query builder.
//!
//! Chainable clause methods validate their inputs eagerly (identifiers,
//! operators, raw expressions) and accumulate into a
//! [`QueryState`](crate::render::QueryState); terminal operations render,
//! execute and then reset the builder so it can be reused for the next
//! statement. Transaction state survives resets.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::clause::{
    CondRhs, Condition, Connector, JoinClause, JoinTarget, OrderDirection, OrderEntry,
    ParsedOption, validate_join_type, validate_operator,
};
use crate::db::{ConnMeta, Db};
use crate::dialect::Dialect;
use crate::driver::DriverConnection;
use crate::error::SqlFluentError;
use crate::expr::SetValue;
use crate::ident::{self, RESERVED_WORDS};
use crate::render::{self, InsertPayload, OnDuplicate, QueryState};
use crate::results::{Fetched, ResultSet, ReturnType, Row};
use crate::safety::{SecurityEventKind, screen_field, validate_raw_expression};
use crate::transaction::{TransactionState, TxAction};
use crate::value::{Subquery, Value};

enum ClauseKind {
    Where,
    Having,
}

/// Fluent builder bound to one named connection.
///
/// Chainable methods return `Result<&mut Self>` so invalid input fails at
/// the call site instead of at execution. Terminal methods are async and
/// reset the accumulated clauses afterwards, success or failure.
pub struct QueryBuilder {
    db: Arc<Db>,
    connection: String,
    dialect: Dialect,
    prefix: Option<String>,
    state: QueryState,
    return_type: ReturnType,
    map_key: Option<String>,
    want_total_count: bool,
    total_count: Option<u64>,
    on_duplicate: Option<OnDuplicate>,
    lock_method: &'static str,
    last_query: Option<String>,
    tx: TransactionState,
    /// Connection pinned while a transaction is open; used by `Drop` for the
    /// best-effort shutdown rollback.
    tx_conn: Option<Arc<dyn DriverConnection>>,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("connection", &self.connection)
            .field("dialect", &self.dialect)
            .field("prefix", &self.prefix)
            .field("state", &self.state)
            .field("return_type", &self.return_type)
            .field("map_key", &self.map_key)
            .field("want_total_count", &self.want_total_count)
            .field("total_count", &self.total_count)
            .field("lock_method", &self.lock_method)
            .field("last_query", &self.last_query)
            .field("tx", &self.tx)
            .finish()
    }
}

fn standard_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

impl QueryBuilder {
    pub(crate) fn new(db: Arc<Db>, connection: String, meta: ConnMeta) -> Self {
        QueryBuilder {
            db,
            connection,
            dialect: meta.dialect,
            prefix: meta.prefix,
            state: QueryState::default(),
            return_type: ReturnType::Rows,
            map_key: None,
            want_total_count: false,
            total_count: None,
            on_duplicate: None,
            lock_method: "READ",
            last_query: None,
            tx: TransactionState::default(),
            tx_conn: None,
        }
    }

    /// A copy of this builder's accumulated clause state, bound to the same
    /// connection name. Live connection and statement handles are never
    /// duplicated; the copy re-acquires them lazily like a fresh builder,
    /// and it starts outside any transaction.
    #[must_use]
    pub fn snapshot(&self) -> QueryBuilder {
        QueryBuilder {
            db: self.db.clone(),
            connection: self.connection.clone(),
            dialect: self.dialect,
            prefix: self.prefix.clone(),
            state: self.state.clone(),
            return_type: self.return_type,
            map_key: self.map_key.clone(),
            want_total_count: self.want_total_count,
            total_count: None,
            on_duplicate: self.on_duplicate.clone(),
            lock_method: self.lock_method,
            last_query: None,
            tx: TransactionState::default(),
            tx_conn: None,
        }
    }

    /// The dialect of the bound connection.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn prefixed(&self, table: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{table}"),
            None => table.to_string(),
        }
    }

    /// Screen an identifier for smuggled SQL and reserved words. Neither
    /// rejects by itself; escaping does the rejecting.
    fn note_identifier(&self, name: &str) {
        if let Some(token) = screen_field(name) {
            self.db.security().emit(
                SecurityEventKind::SqlInjectionAttempt,
                format!("suspicious identifier: {name}"),
                json!({ "token": token }),
            );
        }
        for component in name.split('.') {
            if RESERVED_WORDS
                .iter()
                .any(|word| word.eq_ignore_ascii_case(component))
            {
                self.db.security().emit(
                    SecurityEventKind::ReservedWord,
                    format!("reserved word used as identifier: {component}"),
                    json!({ "identifier": name }),
                );
            }
        }
    }

    fn escape_checked(&self, name: &str) -> Result<String, SqlFluentError> {
        self.note_identifier(name);
        ident::escape(name, self.dialect).inspect_err(|_| {
            self.db.security().emit(
                SecurityEventKind::InvalidIdentifier,
                format!("malformed identifier rejected: {name}"),
                json!({ "identifier": name }),
            );
        })
    }

    fn add_condition(
        &mut self,
        kind: ClauseKind,
        connector: Connector,
        field: &str,
        operator: &str,
        rhs: CondRhs,
    ) -> Result<&mut Self, SqlFluentError> {
        let lhs = self.escape_checked(field)?;
        let operator = validate_operator(operator)?;
        self.push_condition(kind, connector, Condition {
            connector,
            lhs,
            operator,
            rhs,
            raw: false,
        });
        Ok(self)
    }

    fn push_condition(&mut self, kind: ClauseKind, connector: Connector, mut cond: Condition) {
        let list = match kind {
            ClauseKind::Where => &mut self.state.wheres,
            ClauseKind::Having => &mut self.state.havings,
        };
        cond.connector = if list.is_empty() {
            Connector::None
        } else {
            connector
        };
        list.push(cond);
    }

    // ---- WHERE / HAVING -------------------------------------------------

    /// `field = value`, AND-chained.
    pub fn where_eq(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.where_clause(field, "=", value)
    }

    /// `field = value`, OR-chained.
    pub fn or_where_eq(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.or_where(field, "=", value)
    }

    /// `field <op> value`, AND-chained. A `Value::Null` right-hand side
    /// renders as `IS NULL` / `IS NOT NULL` for equality operators.
    pub fn where_clause(
        &mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            operator,
            CondRhs::One(value.into()),
        )
    }

    /// `field <op> value`, OR-chained.
    pub fn or_where(
        &mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::Or,
            field,
            operator,
            CondRhs::One(value.into()),
        )
    }

    pub fn where_in(
        &mut self,
        field: &str,
        values: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            "IN",
            CondRhs::Many(values),
        )
    }

    pub fn where_not_in(
        &mut self,
        field: &str,
        values: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            "NOT IN",
            CondRhs::Many(values),
        )
    }

    pub fn where_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            "BETWEEN",
            CondRhs::Range(low.into(), high.into()),
        )
    }

    pub fn where_not_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            "NOT BETWEEN",
            CondRhs::Range(low.into(), high.into()),
        )
    }

    /// `field IS NULL`. Structurally value-less; distinct from comparing
    /// against `Value::Null`.
    pub fn where_is_null(&mut self, field: &str) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(ClauseKind::Where, Connector::And, field, "IS", CondRhs::None)
    }

    pub fn where_is_not_null(&mut self, field: &str) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Where,
            Connector::And,
            field,
            "IS NOT",
            CondRhs::None,
        )
    }

    /// `EXISTS (subquery)`.
    pub fn where_exists(&mut self, subquery: Subquery) -> Result<&mut Self, SqlFluentError> {
        self.push_condition(ClauseKind::Where, Connector::And, Condition {
            connector: Connector::And,
            lhs: String::new(),
            operator: "EXISTS".to_string(),
            rhs: CondRhs::One(Value::Subquery(subquery)),
            raw: false,
        });
        Ok(self)
    }

    pub fn where_not_exists(&mut self, subquery: Subquery) -> Result<&mut Self, SqlFluentError> {
        self.push_condition(ClauseKind::Where, Connector::And, Condition {
            connector: Connector::And,
            lhs: String::new(),
            operator: "NOT EXISTS".to_string(),
            rhs: CondRhs::One(Value::Subquery(subquery)),
            raw: false,
        });
        Ok(self)
    }

    /// A raw predicate with `?` placeholders, validated before acceptance.
    /// Rejections emit a `SQL_INJECTION_ATTEMPT` security event.
    pub fn where_raw(
        &mut self,
        expr: &str,
        params: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_raw(ClauseKind::Where, Connector::And, expr, params)
    }

    pub fn or_where_raw(
        &mut self,
        expr: &str,
        params: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_raw(ClauseKind::Where, Connector::Or, expr, params)
    }

    /// A value-less predicate such as `updated_at > created_at`, validated
    /// like any other raw expression.
    pub fn where_expr(&mut self, expr: &str) -> Result<&mut Self, SqlFluentError> {
        self.add_raw(ClauseKind::Where, Connector::And, expr, Vec::new())
    }

    fn add_raw(
        &mut self,
        kind: ClauseKind,
        connector: Connector,
        expr: &str,
        params: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        if let Err(err) = validate_raw_expression(expr) {
            self.db.security().emit(
                SecurityEventKind::SqlInjectionAttempt,
                format!("raw expression rejected: {err}"),
                json!({ "expression": expr }),
            );
            return Err(err);
        }
        self.push_condition(kind, connector, Condition {
            connector,
            lhs: expr.to_string(),
            operator: String::new(),
            rhs: CondRhs::Many(params),
            raw: true,
        });
        Ok(self)
    }

    /// `field <op> value` in the HAVING list, AND-chained.
    pub fn having(
        &mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Having,
            Connector::And,
            field,
            operator,
            CondRhs::One(value.into()),
        )
    }

    pub fn or_having(
        &mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_condition(
            ClauseKind::Having,
            Connector::Or,
            field,
            operator,
            CondRhs::One(value.into()),
        )
    }

    pub fn having_raw(
        &mut self,
        expr: &str,
        params: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_raw(ClauseKind::Having, Connector::And, expr, params)
    }

    // ---- joins ----------------------------------------------------------

    /// Join another table. The ON condition is trusted text; it is the one
    /// place the builder does not validate, matching its role as developer
    /// input rather than request data.
    pub fn join(
        &mut self,
        table: &str,
        condition: &str,
        join_type: &str,
    ) -> Result<&mut Self, SqlFluentError> {
        self.note_identifier(table);
        let join_type = validate_join_type(join_type)?;
        self.state.joins.push(JoinClause {
            join_type,
            target: JoinTarget::Table(self.prefixed(table)),
            condition: condition.to_string(),
            alias: None,
            extra_conditions: Vec::new(),
        });
        Ok(self)
    }

    /// Join a table under an alias.
    pub fn join_as(
        &mut self,
        table: &str,
        alias: &str,
        condition: &str,
        join_type: &str,
    ) -> Result<&mut Self, SqlFluentError> {
        self.note_identifier(table);
        self.note_identifier(alias);
        let join_type = validate_join_type(join_type)?;
        self.state.joins.push(JoinClause {
            join_type,
            target: JoinTarget::Table(self.prefixed(table)),
            condition: condition.to_string(),
            alias: Some(alias.to_string()),
            extra_conditions: Vec::new(),
        });
        Ok(self)
    }

    /// Join a rendered subquery under an alias.
    pub fn join_subquery(
        &mut self,
        subquery: Subquery,
        alias: &str,
        condition: &str,
        join_type: &str,
    ) -> Result<&mut Self, SqlFluentError> {
        self.note_identifier(alias);
        let join_type = validate_join_type(join_type)?;
        self.state.joins.push(JoinClause {
            join_type,
            target: JoinTarget::Subquery {
                sql: subquery.sql,
                params: subquery.params,
            },
            condition: condition.to_string(),
            alias: Some(alias.to_string()),
            extra_conditions: Vec::new(),
        });
        Ok(self)
    }

    /// Attach `field <op> value` to an existing join's ON clause,
    /// AND-chained. `target` is the joined table name or its alias.
    pub fn join_where(
        &mut self,
        target: &str,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_join_condition(target, Connector::And, field, operator, value.into())
    }

    /// OR-chained variant of [`QueryBuilder::join_where`].
    pub fn join_or_where(
        &mut self,
        target: &str,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        self.add_join_condition(target, Connector::Or, field, operator, value.into())
    }

    fn add_join_condition(
        &mut self,
        target: &str,
        connector: Connector,
        field: &str,
        operator: &str,
        value: Value,
    ) -> Result<&mut Self, SqlFluentError> {
        let lhs = self.escape_checked(field)?;
        let operator = validate_operator(operator)?;
        let needle_table = self.prefixed(target);
        let join = self
            .state
            .joins
            .iter_mut()
            .find(|join| {
                join.alias.as_deref() == Some(target)
                    || matches!(&join.target, JoinTarget::Table(name) if *name == needle_table)
            })
            .ok_or_else(|| {
                SqlFluentError::InvalidArgument(format!("no join registered for {target}"))
            })?;
        join.extra_conditions.push(Condition {
            connector,
            lhs,
            operator,
            rhs: CondRhs::One(value),
            raw: false,
        });
        Ok(self)
    }

    // ---- projection / grouping / ordering -------------------------------

    /// Select specific columns. Plain names are escaped at render time;
    /// anything else (expressions, aliases) passes through as trusted text.
    pub fn columns(&mut self, columns: &[&str]) -> &mut Self {
        for column in columns {
            self.note_identifier(column);
            self.state.columns.push((*column).to_string());
        }
        self
    }

    /// GROUP BY a column (escaped) or a validated raw expression.
    pub fn group_by(&mut self, field: &str) -> Result<&mut Self, SqlFluentError> {
        let entry = match ident::escape(field, self.dialect) {
            Ok(escaped) => escaped,
            Err(_) => {
                validate_raw_expression(field)?;
                field.to_string()
            }
        };
        self.state.group_by.push(entry);
        Ok(self)
    }

    /// ORDER BY a column or validated expression. `RAND()` (any case,
    /// optional space) maps to the dialect's random function.
    pub fn order_by(&mut self, field: &str, direction: &str) -> Result<&mut Self, SqlFluentError> {
        let trimmed = field.trim();
        if trimmed.eq_ignore_ascii_case("rand()") || trimmed.eq_ignore_ascii_case("rand ()") {
            self.state.order_by.push(OrderEntry::Random);
            return Ok(self);
        }
        let direction = OrderDirection::parse(direction)?;
        let expr = match ident::escape(trimmed, self.dialect) {
            Ok(escaped) => escaped,
            Err(_) => {
                validate_raw_expression(trimmed)?;
                trimmed.to_string()
            }
        };
        self.state.order_by.push(OrderEntry::Plain { expr, direction });
        Ok(self)
    }

    /// ORDER BY the dialect's random function.
    pub fn order_by_random(&mut self) -> &mut Self {
        self.state.order_by.push(OrderEntry::Random);
        self
    }

    /// `ORDER BY FIELD(column, v1, v2, ...)`: rows sorted by each value's
    /// position in the list. Values are driver-quoted at render time.
    pub fn order_by_field(
        &mut self,
        field: &str,
        direction: &str,
        values: Vec<Value>,
    ) -> Result<&mut Self, SqlFluentError> {
        let expr = self.escape_checked(field)?;
        let direction = OrderDirection::parse(direction)?;
        self.state.order_by.push(OrderEntry::Field {
            expr,
            values,
            direction,
        });
        Ok(self)
    }

    /// `ORDER BY column REGEXP 'pattern'`, pattern driver-quoted.
    pub fn order_by_regexp(
        &mut self,
        field: &str,
        pattern: &str,
    ) -> Result<&mut Self, SqlFluentError> {
        let expr = self.escape_checked(field)?;
        self.state.order_by.push(OrderEntry::Regexp {
            expr,
            pattern: pattern.to_string(),
        });
        Ok(self)
    }

    // ---- modifiers -------------------------------------------------------

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.state.offset = Some(offset);
        self
    }

    /// Position LIMIT/OFFSET on page `page` (1-based) of `per_page` rows.
    /// Combine with [`QueryBuilder::with_total_count`] to derive the page
    /// count.
    pub fn page(&mut self, page: u64, per_page: u64) -> &mut Self {
        self.state.limit = Some(per_page);
        self.state.offset = Some(page.saturating_sub(1) * per_page);
        self
    }

    /// Add a SELECT/DML keyword option (`DISTINCT`, `SQL_NO_CACHE`,
    /// `IGNORE`, ...). The two locking options route to their dedicated
    /// suffix position.
    pub fn set_query_option(&mut self, option: &str) -> Result<&mut Self, SqlFluentError> {
        match crate::clause::parse_query_option(option)? {
            ParsedOption::Keyword(keyword) => {
                if !self.state.options.contains(&keyword) {
                    self.state.options.push(keyword);
                }
            }
            ParsedOption::Lock(mode) => self.state.lock = mode,
        }
        Ok(self)
    }

    /// Append `FOR UPDATE` to the next SELECT.
    pub fn for_update(&mut self) -> &mut Self {
        self.state.lock = crate::clause::LockMode::ForUpdate;
        self
    }

    /// Append `LOCK IN SHARE MODE` to the next SELECT (MySQL syntax).
    pub fn lock_in_share_mode(&mut self) -> &mut Self {
        self.state.lock = crate::clause::LockMode::ShareMode;
        self
    }

    /// Return the next SELECT as one JSON-encoded string.
    pub fn return_json(&mut self) -> &mut Self {
        self.return_type = ReturnType::Json;
        self
    }

    /// Re-key the next SELECT's rows by this column's value, preserving
    /// order.
    pub fn map_key(&mut self, field: &str) -> Result<&mut Self, SqlFluentError> {
        // validated but stored unescaped; used to look rows up by name
        self.escape_checked(field)?;
        self.map_key = Some(field.to_string());
        Ok(self)
    }

    /// Also run a COUNT sidecar for the next SELECT; read it afterwards via
    /// [`QueryBuilder::total_count`].
    pub fn with_total_count(&mut self) -> &mut Self {
        self.want_total_count = true;
        self
    }

    /// The sidecar count from the last SELECT that requested one.
    #[must_use]
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    /// The most recently rendered statement, placeholders intact. Survives
    /// the per-terminal clause reset.
    #[must_use]
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// On duplicate key, update `columns` with the attempted insert's
    /// values; optionally route `last_insert_id` through
    /// `LAST_INSERT_ID(col)` (MySQL only, enforced at execution).
    pub fn on_duplicate(&mut self, columns: &[&str], last_insert_id: Option<&str>) -> &mut Self {
        self.on_duplicate = Some(OnDuplicate {
            updates: columns
                .iter()
                .map(|column| ((*column).to_string(), None))
                .collect(),
            last_insert_id: last_insert_id.map(str::to_string),
        });
        self
    }

    /// On duplicate key, apply explicit assignments instead of the
    /// attempted insert's values.
    pub fn on_duplicate_set(&mut self, updates: &[(&str, SetValue)]) -> &mut Self {
        self.on_duplicate = Some(OnDuplicate {
            updates: updates
                .iter()
                .map(|(column, value)| ((*column).to_string(), Some(value.clone())))
                .collect(),
            last_insert_id: None,
        });
        self
    }

    // ---- terminal operations --------------------------------------------

    fn reset_clauses(&mut self) {
        self.state = QueryState::default();
        self.return_type = ReturnType::Rows;
        self.map_key = None;
        self.want_total_count = false;
        self.on_duplicate = None;
    }

    fn package(&self, result: ResultSet) -> Result<Fetched, SqlFluentError> {
        if self.return_type == ReturnType::Json {
            return Ok(Fetched::Json(result.to_json_string()?));
        }
        if let Some(key) = &self.map_key {
            let mut keyed = Vec::with_capacity(result.len());
            for row in result.rows {
                let k = row.get(key).map(Value::key_string).ok_or_else(|| {
                    SqlFluentError::ExecutionError(format!(
                        "map_key column {key} missing from result"
                    ))
                })?;
                keyed.push((k, row));
            }
            return Ok(Fetched::Keyed(keyed));
        }
        Ok(Fetched::Rows(result.rows))
    }

    async fn select_inner(&mut self, table: &str, op: &str) -> Result<ResultSet, SqlFluentError> {
        self.state.table = self.prefixed(table);
        self.note_identifier(table);
        let db = self.db.clone();
        let engine = db.engine();
        let conn = engine.connection(&self.connection).await?;
        let quote = |raw: &str| conn.quote(raw);
        let (sql, params) = render::render_select(&self.state, self.dialect, &quote)?;
        self.last_query = Some(sql.clone());
        let rows = engine.query(op, &self.connection, &sql, &params).await?;

        if self.want_total_count {
            let (count_sql, count_params) =
                render::render_count(&self.state, self.dialect, &quote)?;
            let total = match engine
                .query("total_count", &self.connection, &count_sql, &count_params)
                .await
            {
                Ok(counted) => counted
                    .rows
                    .first()
                    .and_then(|row| row.get_by_index(0))
                    .and_then(Value::as_int)
                    .and_then(|n| u64::try_from(n).ok()),
                Err(err) => {
                    warn!(error = %err, "total-count query failed, using fetched row count");
                    None
                }
            };
            self.total_count = Some(total.unwrap_or(rows.len() as u64));
        }
        Ok(rows)
    }

    /// Fetch all matching rows, post-processed per `return_json`/`map_key`.
    pub async fn get(&mut self, table: &str) -> Result<Fetched, SqlFluentError> {
        let op = format!("get({table})");
        let result = self.select_inner(table, &op).await;
        let packaged = result.and_then(|rows| self.package(rows));
        self.reset_clauses();
        packaged
    }

    /// Fetch the first matching row.
    pub async fn get_one(&mut self, table: &str) -> Result<Option<Row>, SqlFluentError> {
        if self.state.limit.is_none() {
            self.state.limit = Some(1);
        }
        let op = format!("get_one({table})");
        let result = self.select_inner(table, &op).await;
        self.reset_clauses();
        Ok(result?.rows.into_iter().next())
    }

    /// Fetch a single column of the first matching row.
    pub async fn get_value(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<Value>, SqlFluentError> {
        self.state.columns = vec![column.to_string()];
        if self.state.limit.is_none() {
            self.state.limit = Some(1);
        }
        let op = format!("get_value({table})");
        let result = self.select_inner(table, &op).await;
        self.reset_clauses();
        Ok(result?
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.values.into_iter().next()))
    }

    /// Whether any row matches the accumulated conditions.
    pub async fn has(&mut self, table: &str) -> Result<bool, SqlFluentError> {
        Ok(self.get_one(table).await?.is_some())
    }

    async fn insert_payload(
        &mut self,
        table: &str,
        payload: InsertPayload,
        replace: bool,
    ) -> Result<(u64, Option<i64>), SqlFluentError> {
        for column in &payload.columns {
            self.note_identifier(column);
        }
        if self.on_duplicate.is_some() {
            self.dialect.require_mysql("ON DUPLICATE KEY UPDATE")?;
        }
        let use_alias = if self.on_duplicate.is_some() {
            self.db.use_insert_alias(&self.connection).await
        } else {
            false
        };
        let table_full = self.prefixed(table);
        let (sql, params) = render::render_insert(
            &table_full,
            &payload,
            &self.state.options,
            self.on_duplicate.as_ref(),
            use_alias,
            replace,
            self.dialect,
        )?;
        self.last_query = Some(sql.clone());
        let db = self.db.clone();
        let engine = db.engine();
        let verb = if replace { "replace" } else { "insert" };
        let affected = engine
            .execute(&format!("{verb}({table})"), &self.connection, &sql, &params)
            .await?;
        if affected == 0 {
            return Ok((0, None));
        }
        let conn = engine.connection(&self.connection).await?;
        let id = conn.last_insert_id().await?;
        Ok((affected, Some(id)))
    }

    /// Insert one row. Returns the last insert id, or `None` when the
    /// statement affected no rows (e.g. `INSERT IGNORE` on a duplicate).
    pub async fn insert(
        &mut self,
        table: &str,
        data: &[(&str, SetValue)],
    ) -> Result<Option<i64>, SqlFluentError> {
        let payload = pairs_to_payload(data);
        let result = self.insert_payload(table, payload, false).await;
        self.reset_clauses();
        result.map(|(_, id)| id)
    }

    /// Insert several rows in one statement; returns rows affected.
    pub async fn insert_multi(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<SetValue>>,
    ) -> Result<u64, SqlFluentError> {
        let payload = InsertPayload {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        };
        let result = self.insert_payload(table, payload, false).await;
        self.reset_clauses();
        result.map(|(affected, _)| affected)
    }

    /// `REPLACE INTO` (MySQL only).
    pub async fn replace(
        &mut self,
        table: &str,
        data: &[(&str, SetValue)],
    ) -> Result<Option<i64>, SqlFluentError> {
        if let Err(err) = self.dialect.require_mysql("REPLACE INTO") {
            self.reset_clauses();
            return Err(err);
        }
        let payload = pairs_to_payload(data);
        let result = self.insert_payload(table, payload, true).await;
        self.reset_clauses();
        result.map(|(_, id)| id)
    }

    async fn update_inner(
        &mut self,
        table: &str,
        data: &[(&str, SetValue)],
    ) -> Result<u64, SqlFluentError> {
        self.state.table = self.prefixed(table);
        self.note_identifier(table);
        for (column, _) in data {
            self.note_identifier(column);
        }
        let owned: Vec<(String, SetValue)> = data
            .iter()
            .map(|(column, value)| ((*column).to_string(), value.clone()))
            .collect();
        let db = self.db.clone();
        let engine = db.engine();
        let conn = engine.connection(&self.connection).await?;
        let quote = |raw: &str| conn.quote(raw);
        let (sql, params) = render::render_update(&self.state, &owned, self.dialect, &quote)?;
        self.last_query = Some(sql.clone());
        engine
            .execute(&format!("update({table})"), &self.connection, &sql, &params)
            .await
    }

    /// Update matching rows; returns rows affected.
    pub async fn update(
        &mut self,
        table: &str,
        data: &[(&str, SetValue)],
    ) -> Result<u64, SqlFluentError> {
        let result = self.update_inner(table, data).await;
        self.reset_clauses();
        result
    }

    async fn delete_inner(&mut self, table: &str) -> Result<u64, SqlFluentError> {
        self.state.table = self.prefixed(table);
        self.note_identifier(table);
        let db = self.db.clone();
        let engine = db.engine();
        let conn = engine.connection(&self.connection).await?;
        let quote = |raw: &str| conn.quote(raw);
        let (sql, params) = render::render_delete(&self.state, self.dialect, &quote)?;
        self.last_query = Some(sql.clone());
        engine
            .execute(&format!("delete({table})"), &self.connection, &sql, &params)
            .await
    }

    /// Delete matching rows; returns rows affected.
    pub async fn delete(&mut self, table: &str) -> Result<u64, SqlFluentError> {
        let result = self.delete_inner(table).await;
        self.reset_clauses();
        result
    }

    /// Run caller-supplied SQL with `?` placeholders. The text is trusted
    /// developer input; parameters still bind through the driver.
    pub async fn raw_query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Fetched, SqlFluentError> {
        self.last_query = Some(sql.to_string());
        let db = self.db.clone();
        let result = db
            .engine()
            .query("raw_query", &self.connection, sql, params)
            .await;
        let packaged = result.and_then(|rows| self.package(rows));
        self.reset_clauses();
        packaged
    }

    /// First row of a raw query.
    pub async fn raw_query_one(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, SqlFluentError> {
        self.last_query = Some(sql.to_string());
        let db = self.db.clone();
        let result = db
            .engine()
            .query("raw_query_one", &self.connection, sql, params)
            .await;
        self.reset_clauses();
        Ok(result?.rows.into_iter().next())
    }

    /// First column of the first row of a raw query.
    pub async fn raw_query_value(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Value>, SqlFluentError> {
        self.last_query = Some(sql.to_string());
        let db = self.db.clone();
        let result = db
            .engine()
            .query("raw_query_value", &self.connection, sql, params)
            .await;
        self.reset_clauses();
        Ok(result?
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.values.into_iter().next()))
    }

    /// Render the accumulated SELECT as a spliceable subquery instead of
    /// executing it. Uses standard single-quote literal escaping since no
    /// driver is consulted.
    pub fn as_subquery(&mut self, table: &str) -> Result<Subquery, SqlFluentError> {
        self.state.table = self.prefixed(table);
        let rendered = render::render_select(&self.state, self.dialect, &standard_quote);
        self.reset_clauses();
        let (sql, params) = rendered?;
        self.last_query = Some(sql.clone());
        Ok(Subquery { sql, params })
    }

    // ---- transactions ----------------------------------------------------

    /// Open a transaction, or a savepoint when one is already open.
    /// Nesting depth `n` maps to savepoint `LEVEL{n}`.
    pub async fn start_transaction(&mut self) -> Result<(), SqlFluentError> {
        let db = self.db.clone();
        let conn = db.engine().connection(&self.connection).await?;
        let action = self.tx.start(self.dialect);
        match self.apply_tx_action(&conn, &action).await {
            Ok(()) => {
                self.tx_conn = Some(conn);
                Ok(())
            }
            Err(err) => {
                self.tx.level -= 1;
                if self.tx.level == 0 {
                    self.tx.in_progress = false;
                }
                Err(err)
            }
        }
    }

    /// Commit the innermost transaction level. Returns `false` (not an
    /// error) when no transaction is open.
    pub async fn commit(&mut self) -> Result<bool, SqlFluentError> {
        let Some(action) = self.tx.commit(self.dialect) else {
            return Ok(false);
        };
        let db = self.db.clone();
        let conn = db.engine().connection(&self.connection).await?;
        self.apply_tx_action(&conn, &action).await?;
        if self.tx.level == 0 {
            self.tx_conn = None;
        }
        Ok(true)
    }

    /// Roll back the innermost transaction level. Returns `false` when no
    /// transaction is open.
    pub async fn rollback(&mut self) -> Result<bool, SqlFluentError> {
        let Some(action) = self.tx.rollback(self.dialect) else {
            return Ok(false);
        };
        let db = self.db.clone();
        let conn = db.engine().connection(&self.connection).await?;
        self.apply_tx_action(&conn, &action).await?;
        if self.tx.level == 0 {
            self.tx_conn = None;
        }
        Ok(true)
    }

    /// Current transaction nesting depth (0 = none open).
    #[must_use]
    pub fn transaction_level(&self) -> u32 {
        self.tx.level
    }

    async fn apply_tx_action(
        &self,
        conn: &Arc<dyn DriverConnection>,
        action: &TxAction,
    ) -> Result<(), SqlFluentError> {
        match action {
            TxAction::Begin => conn.begin().await,
            TxAction::Commit => conn.commit().await,
            TxAction::Rollback => conn.rollback().await,
            TxAction::Exec(sql) => {
                let db = self.db.clone();
                db.engine()
                    .exec_raw("transaction", &self.connection, sql)
                    .await?;
                Ok(())
            }
            TxAction::Noop => Ok(()),
        }
    }

    // ---- table locks (MySQL) ----------------------------------------------

    /// Set the lock mode used by [`QueryBuilder::lock`]: `READ` or `WRITE`.
    pub fn set_lock_method(&mut self, method: &str) -> Result<&mut Self, SqlFluentError> {
        match method.trim().to_uppercase().as_str() {
            "READ" => self.lock_method = "READ",
            "WRITE" => self.lock_method = "WRITE",
            other => {
                return Err(SqlFluentError::InvalidArgument(format!(
                    "lock method must be READ or WRITE, got {other}"
                )));
            }
        }
        Ok(self)
    }

    /// `LOCK TABLES` over the given tables (MySQL only).
    pub async fn lock(&mut self, tables: &[&str]) -> Result<(), SqlFluentError> {
        self.dialect.require_mysql("LOCK TABLES")?;
        if tables.is_empty() {
            return Err(SqlFluentError::InvalidArgument(
                "lock requires at least one table".to_string(),
            ));
        }
        let mut items = Vec::with_capacity(tables.len());
        for table in tables {
            let escaped = self.escape_checked(&self.prefixed(table))?;
            items.push(format!("{escaped} {}", self.lock_method));
        }
        let sql = format!("LOCK TABLES {}", items.join(", "));
        let db = self.db.clone();
        db.engine()
            .exec_raw("lock", &self.connection, &sql)
            .await?;
        Ok(())
    }

    /// `UNLOCK TABLES` (MySQL only).
    pub async fn unlock(&mut self) -> Result<(), SqlFluentError> {
        self.dialect.require_mysql("UNLOCK TABLES")?;
        let db = self.db.clone();
        db.engine()
            .exec_raw("unlock", &self.connection, "UNLOCK TABLES")
            .await?;
        Ok(())
    }
}

fn pairs_to_payload(data: &[(&str, SetValue)]) -> InsertPayload {
    InsertPayload {
        columns: data.iter().map(|(column, _)| (*column).to_string()).collect(),
        rows: vec![data.iter().map(|(_, value)| value.clone()).collect()],
    }
}

/// A builder dropped with a transaction still open rolls it back on a
/// best-effort basis and reports failures as `SHUTDOWN_ROLLBACK_FAILED`
/// security events. Not a substitute for committing or rolling back
/// explicitly.
impl Drop for QueryBuilder {
    fn drop(&mut self) {
        if self.tx.level == 0 {
            return;
        }
        let Some(conn) = self.tx_conn.take() else {
            return;
        };
        let db = self.db.clone();
        let level = self.tx.level;
        let connection = self.connection.clone();
        warn!(
            connection = %connection,
            level, "builder dropped with open transaction, rolling back"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = conn.rollback().await {
                    db.security().emit(
                        SecurityEventKind::ShutdownRollbackFailed,
                        format!("rollback of abandoned transaction failed: {err}"),
                        json!({ "connection": connection, "level": level }),
                    );
                }
            });
        }
        self.tx.force_reset();
    }
}
