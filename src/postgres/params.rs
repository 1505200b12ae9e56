use std::error::Error;

use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::error::SqlFluentError;
use crate::value::Value;

/// Borrowed parameter references in the shape `tokio_postgres` binds.
pub struct Params<'a> {
    references: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> Params<'a> {
    /// Check and wrap a parameter slice.
    ///
    /// # Errors
    /// Returns [`SqlFluentError::ParameterError`] when a splice-time value
    /// (column reference, subquery) is present.
    pub fn convert(params: &'a [Value]) -> Result<Params<'a>, SqlFluentError> {
        if let Some(bad) = params.iter().find(|p| !p.is_bindable()) {
            return Err(SqlFluentError::ParameterError(format!(
                "cannot bind splice-time value: {bad:?}"
            )));
        }
        Ok(Params {
            references: params.iter().map(|p| p as &(dyn ToSql + Sync)).collect(),
        })
    }

    #[must_use]
    pub fn as_refs(&self) -> &[&'a (dyn ToSql + Sync)] {
        &self.references
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => (*b).to_sql(ty, out),
            Value::Int(i) => (*i).to_sql(ty, out),
            Value::Float(f) => (*f).to_sql(ty, out),
            Value::Text(s) => s.to_sql(ty, out),
            Value::Timestamp(dt) => dt.to_sql(ty, out),
            Value::Blob(bytes) => bytes.to_sql(ty, out),
            Value::Json(json) => json.to_sql(ty, out),
            Value::Column(_) | Value::Subquery(_) => {
                Err(format!("cannot bind splice-time value: {self:?}").into())
            }
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::CHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}
