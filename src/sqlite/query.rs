use std::sync::Arc;

use rusqlite::Statement;

use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

/// Extract one column of a rusqlite row as a [`Value`].
///
/// # Errors
/// Returns the wrapped rusqlite error when the column cannot be read.
pub fn extract_value(row: &rusqlite::Row, idx: usize) -> Result<Value, SqlFluentError> {
    let value: rusqlite::types::Value = row.get(idx).map_err(super::map_sqlite_err)?;
    Ok(match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::Int(i),
        rusqlite::types::Value::Real(f) => Value::Float(f),
        rusqlite::types::Value::Text(s) => Value::Text(s),
        rusqlite::types::Value::Blob(b) => Value::Blob(b),
    })
}

/// Run a prepared SELECT and materialize every row.
///
/// # Errors
/// Returns [`SqlFluentError`] on bind or step failures.
pub fn build_result_set(
    stmt: &mut Statement,
    params: &[rusqlite::types::Value],
) -> Result<ResultSet, SqlFluentError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(super::map_sqlite_err)?;
    while let Some(row) = rows.next().map_err(super::map_sqlite_err)? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(extract_value(row, i)?);
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}
