use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SqlFluentError;
use crate::value::Value;

lazy_static! {
    // [+-]?<digits><single-letter unit>, e.g. "-1d", "+3M", "10s"
    static ref INTERVAL_RE: Regex = Regex::new(r"^([+-]?)(\d+)([a-zA-Z])$").unwrap();

    // Known-safe zero/fixed-argument SQL functions.
    static ref SAFE_FUNC_RE: Regex = Regex::new(
        r"(?i)^(NOW|CURDATE|CURTIME|UNIX_TIMESTAMP|UTC_TIMESTAMP|UUID|RAND|SYSDATE|LAST_INSERT_ID)\(\)$"
    )
    .unwrap();

    // Date arithmetic anchored on a safe base function:
    // NOW() + interval 3 day, CURDATE() - interval 1 month, ...
    static ref SAFE_DATE_MATH_RE: Regex = Regex::new(
        r"(?i)^(NOW|CURDATE|CURTIME|UTC_TIMESTAMP|SYSDATE)\(\)\s*[+-]\s*interval\s+\d+\s+(second|minute|hour|day|week|month|year)$"
    )
    .unwrap();

    // Safe value-combining functions over plain identifiers, literals and ?
    // placeholders only.
    static ref SAFE_WRAPPED_RE: Regex = Regex::new(
        r"(?i)^(CONCAT|COALESCE|IFNULL|LOWER|UPPER|TRIM|ABS|LENGTH)\(\s*[A-Za-z0-9_,'\s\?\.]*\s*\)$"
    )
    .unwrap();
}

/// Check a raw function expression against the allow-list of known-safe
/// functions and date-arithmetic shapes.
#[must_use]
pub fn is_safe_function(expr: &str) -> bool {
    let trimmed = expr.trim();
    SAFE_FUNC_RE.is_match(trimmed)
        || SAFE_DATE_MATH_RE.is_match(trimmed)
        || SAFE_WRAPPED_RE.is_match(trimmed)
}

/// Interval units keyed by their single-letter code.
fn interval_unit(code: char) -> Option<&'static str> {
    match code {
        's' => Some("second"),
        'm' => Some("minute"),
        'h' => Some("hour"),
        'd' => Some("day"),
        'M' => Some("month"),
        'Y' | 'y' => Some("year"),
        _ => None,
    }
}

/// A value position in an INSERT/UPDATE payload.
///
/// Closed variant set, exhaustively matched by the renderer; there is no
/// runtime shape-sniffing of generic maps.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// Plain assignment `col = ?` (or spliced column/subquery).
    Assign(Value),
    /// `col = col + delta`
    Increment(f64),
    /// `col = col - delta`
    Decrement(f64),
    /// `col = NOT other` (or `col = NOT col` when no column is named).
    Negate(Option<String>),
    /// `col = <expr>` where expr passed the safe-function allow-list;
    /// `params` are appended to the bind list in order.
    Func { expr: String, params: Vec<Value> },
}

impl From<Value> for SetValue {
    fn from(value: Value) -> Self {
        SetValue::Assign(value)
    }
}

impl SetValue {
    /// Plain assignment of any convertible value.
    pub fn of(value: impl Into<Value>) -> Self {
        SetValue::Assign(value.into())
    }

    /// `col = col + delta`.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::InvalidArgument`] for a non-finite delta.
    pub fn inc(delta: f64) -> Result<Self, SqlFluentError> {
        if !delta.is_finite() {
            return Err(SqlFluentError::InvalidArgument(format!(
                "increment delta must be a finite number, got {delta}"
            )));
        }
        Ok(SetValue::Increment(delta))
    }

    /// `col = col - delta`.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::InvalidArgument`] for a non-finite delta.
    pub fn dec(delta: f64) -> Result<Self, SqlFluentError> {
        if !delta.is_finite() {
            return Err(SqlFluentError::InvalidArgument(format!(
                "decrement delta must be a finite number, got {delta}"
            )));
        }
        Ok(SetValue::Decrement(delta))
    }

    /// Boolean negation of `column`, or of the assigned column itself when
    /// `column` is `None`.
    #[must_use]
    pub fn negate(column: Option<&str>) -> Self {
        SetValue::Negate(column.map(str::to_string))
    }

    /// A raw function expression, validated against the safe-function
    /// allow-list.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::UnsafeFunction`] when the expression is not
    /// on the allow-list.
    pub fn func(expr: impl Into<String>, params: Vec<Value>) -> Result<Self, SqlFluentError> {
        let expr = expr.into();
        if !is_safe_function(&expr) {
            return Err(SqlFluentError::UnsafeFunction(expr));
        }
        Ok(SetValue::Func { expr, params })
    }

    /// `NOW()` optionally shifted by an interval like `"-1d"` or `"+3M"`.
    ///
    /// Unit codes: `s` second, `m` minute, `h` hour, `d` day, `M` month,
    /// `Y`/`y` year.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::InvalidInterval`] on a malformed interval or
    /// unknown unit code.
    pub fn now(interval: Option<&str>) -> Result<Self, SqlFluentError> {
        let expr = now_expression(interval)?;
        Ok(SetValue::Func {
            expr,
            params: Vec::new(),
        })
    }
}

/// Build a `NOW()`-based datetime expression with an optional interval
/// suffix. Shared by [`SetValue::now`] and the builder's interval helpers.
pub fn now_expression(interval: Option<&str>) -> Result<String, SqlFluentError> {
    let Some(interval) = interval else {
        return Ok("NOW()".to_string());
    };
    let caps = INTERVAL_RE
        .captures(interval.trim())
        .ok_or_else(|| SqlFluentError::InvalidInterval(interval.to_string()))?;
    let sign = if &caps[1] == "-" { "-" } else { "+" };
    let amount = &caps[2];
    let code = caps[3].chars().next().unwrap_or('?');
    let unit = interval_unit(code)
        .ok_or_else(|| SqlFluentError::InvalidInterval(interval.to_string()))?;
    Ok(format!("NOW() {sign} interval {amount} {unit}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_validate_finiteness() {
        assert!(SetValue::inc(1.0).is_ok());
        assert!(matches!(
            SetValue::inc(f64::NAN),
            Err(SqlFluentError::InvalidArgument(_))
        ));
        assert!(matches!(
            SetValue::dec(f64::INFINITY),
            Err(SqlFluentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn safe_function_allow_list() {
        assert!(is_safe_function("NOW()"));
        assert!(is_safe_function("now()"));
        assert!(is_safe_function("NOW() + interval 3 day"));
        assert!(is_safe_function("CONCAT(first, ' ', last)"));
        assert!(!is_safe_function("SLEEP(10)"));
        assert!(!is_safe_function("LOAD_FILE('/etc/passwd')"));
        assert!(!is_safe_function("NOW(); DROP TABLE users"));
    }

    #[test]
    fn unsafe_function_is_rejected_at_construction() {
        assert!(matches!(
            SetValue::func("SLEEP(10)", vec![]),
            Err(SqlFluentError::UnsafeFunction(_))
        ));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(now_expression(None).unwrap(), "NOW()");
        assert_eq!(
            now_expression(Some("-1d")).unwrap(),
            "NOW() - interval 1 day"
        );
        assert_eq!(
            now_expression(Some("+3M")).unwrap(),
            "NOW() + interval 3 month"
        );
        assert_eq!(
            now_expression(Some("10s")).unwrap(),
            "NOW() + interval 10 second"
        );
        assert!(matches!(
            now_expression(Some("5x")),
            Err(SqlFluentError::InvalidInterval(_))
        ));
        assert!(matches!(
            now_expression(Some("nope")),
            Err(SqlFluentError::InvalidInterval(_))
        ));
    }
}
