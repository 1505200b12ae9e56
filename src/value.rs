use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// A rendered subquery: the SQL text plus the parameters it binds.
///
/// Produced by a builder running in subquery mode and spliced verbatim
/// (parenthesized) into the enclosing statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Values that can appear as query parameters or in result rows.
///
/// `Column` and `Subquery` are splice-time variants: they are resolved while
/// the SQL text is assembled and never reach a driver as bound parameters.
/// Everything else binds positionally through the driver boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL literal. Always means SQL NULL; "no value supplied" is expressed
    /// structurally by the builder API, never by a sentinel.
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// Binary data
    Blob(Vec<u8>),
    /// JSON value
    Json(JsonValue),
    /// Reference to another column, spliced as an escaped identifier
    Column(String),
    /// Nested query, spliced as a parenthesized SQL fragment
    Subquery(Subquery),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be bound positionally through a driver.
    ///
    /// `Column` and `Subquery` must be resolved during rendering; finding one
    /// at bind time is a programming defect surfaced as `ParameterError`.
    #[must_use]
    pub fn is_bindable(&self) -> bool {
        !matches!(self, Value::Column(_) | Value::Subquery(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(v) = self { Some(*v) } else { None }
    }

    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(v) = self { Some(v) } else { None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            // SQLite stores booleans as 0/1 integers
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(dt) => Some(*dt),
            Value::Text(s) => {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                    return Some(dt);
                }
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok()
            }
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(v) = self { Some(v) } else { None }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        if let Value::Json(v) = self { Some(v) } else { None }
    }

    /// Render this value as a JSON value for result serialization.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Timestamp(dt) => JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::Blob(b) => JsonValue::String(
                b.iter().map(|byte| format!("{byte:02x}")).collect::<String>(),
            ),
            Value::Json(j) => j.clone(),
            Value::Column(c) => JsonValue::String(c.clone()),
            Value::Subquery(sq) => JsonValue::String(sq.sql.clone()),
        }
    }

    /// A short display of the value for keying result rows.
    #[must_use]
    pub fn key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => i64::from(*b).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Blob(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
            Value::Json(j) => j.to_string(),
            Value::Column(c) => c.clone(),
            Value::Subquery(sq) => sq.sql.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl From<Subquery> for Value {
    fn from(v: Subquery) -> Self {
        Value::Subquery(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}
