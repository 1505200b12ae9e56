use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use tokio_postgres::Statement;

use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

/// Extract one column of a `tokio_postgres` row as a [`Value`], dispatching
/// on the column's declared type name.
///
/// # Errors
/// Returns the wrapped driver error when the column cannot be read.
pub fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value, SqlFluentError> {
    let type_name = row.columns()[idx].type_().name();
    match type_name {
        "int2" => {
            let val: Option<i16> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, |v| Value::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, |v| Value::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Int))
        }
        "float4" | "float8" => {
            let val: Option<f64> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Float))
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Bool))
        }
        "timestamp" | "timestamptz" => {
            let val: Option<NaiveDateTime> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Timestamp))
        }
        "json" | "jsonb" => {
            let val: Option<JsonValue> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Json))
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Blob))
        }
        _ => {
            // everything else is fetched textually
            let val: Option<String> = row.try_get(idx).map_err(super::map_pg_err)?;
            Ok(val.map_or(Value::Null, Value::Text))
        }
    }
}

/// Materialize prepared-statement rows, taking column names from the
/// statement metadata so empty results still carry them.
///
/// # Errors
/// Returns errors from row value extraction.
pub fn build_result_set(
    stmt: &Statement,
    rows: &[tokio_postgres::Row],
) -> Result<ResultSet, SqlFluentError> {
    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));

    for row in rows {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(extract_value(row, idx)?);
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}
