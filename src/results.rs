use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::SqlFluentError;
use crate::value::Value;

/// A row from a query result.
///
/// Column names are shared across all rows of a result set; a name→index
/// cache avoids repeated string comparisons on lookup.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<Value>,
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl Row {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        let cache = Arc::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );
        Row {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        values: Vec<Value>,
        cache: Arc<HashMap<String, usize>>,
    ) -> Self {
        Row {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// The index of a column by name.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// A value by column name, or `None` when the column doesn't exist.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// A value by column index.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Render the row as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::with_capacity(self.values.len());
        for (name, value) in self.column_names.iter().zip(self.values.iter()) {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Deserialize the row into a named-fields type via serde.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ExecutionError`] when the row does not match
    /// the target shape.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, SqlFluentError> {
        serde_json::from_value(self.to_json())
            .map_err(|e| SqlFluentError::ExecutionError(format!("row deserialization failed: {e}")))
    }
}

/// The result of one statement execution.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Rows returned by a SELECT-shaped statement.
    pub rows: Vec<Row>,
    /// Rows affected, for DML statements.
    pub rows_affected: u64,
    /// Last insert id reported by the driver, when available and non-zero.
    pub last_insert_id: Option<i64>,
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            rows: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Set the column names shared by all rows of this set.
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        let cache = Arc::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );
        self.column_index_cache = Some(cache);
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Append a row from raw values, reusing the shared column names.
    pub fn add_row_values(&mut self, values: Vec<Value>) {
        if let (Some(names), Some(cache)) = (&self.column_names, &self.column_index_cache) {
            self.rows
                .push(Row::with_cache(names.clone(), values, cache.clone()));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize all rows as a JSON array string.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ExecutionError`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String, SqlFluentError> {
        let array: Vec<JsonValue> = self.rows.iter().map(Row::to_json).collect();
        serde_json::to_string(&array)
            .map_err(|e| SqlFluentError::ExecutionError(format!("JSON encoding failed: {e}")))
    }

    /// Deserialize every row into `T`.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ExecutionError`] when any row does not match.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<Vec<T>, SqlFluentError> {
        self.rows.iter().map(Row::to_typed).collect()
    }
}

/// The shape a SELECT result is returned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// Plain rows (the default).
    #[default]
    Rows,
    /// A single JSON-encoded string of the row sequence.
    Json,
}

/// A fetched SELECT result after post-processing.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// Plain ordered rows.
    Rows(Vec<Row>),
    /// Rows re-keyed by a column's value, insertion order preserved.
    Keyed(Vec<(String, Row)>),
    /// The whole row sequence JSON-encoded.
    Json(String),
}

impl Fetched {
    /// The row count regardless of representation.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Fetched::Rows(rows) => rows.len(),
            Fetched::Keyed(pairs) => pairs.len(),
            Fetched::Json(_) => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The plain rows, when this is the `Rows` representation.
    #[must_use]
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Fetched::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        let mut rs = ResultSet::with_capacity(2);
        rs.set_column_names(Arc::new(vec!["id".to_string(), "email".to_string()]));
        rs.add_row_values(vec![Value::Int(1), Value::Text("a@x.com".into())]);
        rs.add_row_values(vec![Value::Int(2), Value::Null]);
        rs
    }

    #[test]
    fn lookup_by_name_and_index() {
        let rs = sample();
        assert_eq!(rs.rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rs.rows[0].get_by_index(1), Some(&Value::Text("a@x.com".into())));
        assert_eq!(rs.rows[0].get("missing"), None);
    }

    #[test]
    fn json_round_trip() {
        let rs = sample();
        let text = rs.to_json_string().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["email"], "a@x.com");
        assert_eq!(parsed[1]["email"], serde_json::Value::Null);
    }

    #[test]
    fn typed_extraction() {
        #[derive(serde::Deserialize)]
        struct UserRow {
            id: i64,
            email: Option<String>,
        }
        let rs = sample();
        let users: Vec<UserRow> = rs.to_typed().unwrap();
        assert_eq!(users[0].id, 1);
        assert_eq!(users[1].email, None);
    }
}
