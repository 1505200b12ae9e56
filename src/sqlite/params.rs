use std::fmt::Write;

use crate::error::SqlFluentError;
use crate::value::Value;

// Buffer reused across timestamp formats on the same blocking thread.
thread_local! {
    static TIMESTAMP_BUF: std::cell::RefCell<String> = std::cell::RefCell::new(String::with_capacity(32));
}

/// Convert one bindable [`Value`] to a rusqlite value.
///
/// # Errors
/// Returns [`SqlFluentError::ParameterError`] for splice-time variants that
/// should have been resolved during rendering.
pub fn to_sqlite_value(value: &Value) -> Result<rusqlite::types::Value, SqlFluentError> {
    match value {
        Value::Null => Ok(rusqlite::types::Value::Null),
        Value::Bool(b) => Ok(rusqlite::types::Value::Integer(i64::from(*b))),
        Value::Int(i) => Ok(rusqlite::types::Value::Integer(*i)),
        Value::Float(f) => Ok(rusqlite::types::Value::Real(*f)),
        Value::Text(s) => Ok(rusqlite::types::Value::Text(s.clone())),
        Value::Timestamp(dt) => TIMESTAMP_BUF.with(|buf| {
            let mut borrow = buf.borrow_mut();
            borrow.clear();
            let _ = write!(borrow, "{}", dt.format("%F %T%.f"));
            Ok(rusqlite::types::Value::Text(borrow.clone()))
        }),
        Value::Blob(bytes) => Ok(rusqlite::types::Value::Blob(bytes.clone())),
        Value::Json(json) => Ok(rusqlite::types::Value::Text(json.to_string())),
        Value::Column(_) | Value::Subquery(_) => Err(SqlFluentError::ParameterError(format!(
            "cannot bind splice-time value: {value:?}"
        ))),
    }
}

/// Convert a parameter slice for binding.
///
/// # Errors
/// Propagates the first conversion failure.
pub fn to_sqlite_values(params: &[Value]) -> Result<Vec<rusqlite::types::Value>, SqlFluentError> {
    params.iter().map(to_sqlite_value).collect()
}
