//! Bundled SQL Server driver over `tiberius`.
//!
//! Tiberius drives a single client exclusively (`&mut` on every call), so
//! the client sits behind an async mutex. TDS has no cheap client-side
//! prepare, statement handles therefore carry the SQL text and re-bind on
//! every execution.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverFactory, DriverStatement};
use crate::error::SqlFluentError;
use crate::results::ResultSet;
use crate::value::Value;

/// The tiberius client over a tokio TCP stream.
pub type MssqlClient = Client<Compat<TcpStream>>;

type SharedClient = Arc<Mutex<MssqlClient>>;

/// Map tiberius failures, surfacing server error numbers and classifying
/// transport-level IO failures as connection loss.
pub(crate) fn map_mssql_err(err: tiberius::error::Error) -> SqlFluentError {
    match &err {
        tiberius::error::Error::Server(token) => {
            SqlFluentError::driver(Some(i64::from(token.code())), token.message().to_string())
        }
        tiberius::error::Error::Io { kind, message } => {
            let code = match kind {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => Some(10054),
                _ => None,
            };
            SqlFluentError::driver(code, message.clone())
        }
        _ => SqlFluentError::MssqlError(err),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Int(i) => ColumnData::I64(Some(*i)),
            Value::Float(f) => ColumnData::F64(Some(*f)),
            Value::Text(s) => ColumnData::String(Some(Cow::from(s.as_str()))),
            Value::Timestamp(dt) => {
                ColumnData::String(Some(Cow::from(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())))
            }
            Value::Blob(bytes) => ColumnData::Binary(Some(Cow::from(bytes.as_slice()))),
            Value::Json(json) => ColumnData::String(Some(Cow::from(json.to_string()))),
            // guarded by is_bindable() before any bind happens
            Value::Column(_) | Value::Subquery(_) => ColumnData::String(None),
        }
    }
}

fn check_bindable(params: &[Value]) -> Result<(), SqlFluentError> {
    if let Some(bad) = params.iter().find(|p| !p.is_bindable()) {
        return Err(SqlFluentError::ParameterError(format!(
            "cannot bind splice-time value: {bad:?}"
        )));
    }
    Ok(())
}

/// Run a parameterized query and materialize the rows.
async fn run_query(
    client: &mut MssqlClient,
    sql: &str,
    params: &[Value],
) -> Result<ResultSet, SqlFluentError> {
    check_bindable(params)?;
    let mut query = tiberius::Query::new(sql.to_string());
    for param in params {
        query.bind(param as &dyn ToSql);
    }
    let stream = query.query(client).await.map_err(map_mssql_err)?;

    let columns = stream.columns().await.map_err(map_mssql_err)?;
    let column_names: Vec<String> = columns
        .map(|cols| cols.iter().map(|col| col.name().to_string()).collect())
        .unwrap_or_default();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stream.into_row_stream();
    while let Some(row) = rows.try_next().await.map_err(map_mssql_err)? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(extract_value(&row, idx));
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}

/// Pull one column out of a tiberius row by probing the value types the
/// crate maps, falling back to text.
fn extract_value(row: &tiberius::Row, idx: usize) -> Value {
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Value::Int(i64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Value::Int(val);
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Value::Float(f64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Value::Float(val);
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(val);
    }
    if let Ok(Some(val)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::Timestamp(val);
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Value::Text(val.to_string());
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Value::Blob(val.to_vec());
    }
    Value::Null
}

async fn run_execute(
    client: &mut MssqlClient,
    sql: &str,
    params: &[Value],
) -> Result<u64, SqlFluentError> {
    check_bindable(params)?;
    let mut query = tiberius::Query::new(sql.to_string());
    for param in params {
        query.bind(param as &dyn ToSql);
    }
    let result = query.execute(client).await.map_err(map_mssql_err)?;
    Ok(result.rows_affected().iter().sum())
}

/// Factory for the bundled SQL Server driver.
pub struct MssqlFactory;

#[async_trait]
impl DriverFactory for MssqlFactory {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        let mut tib = tiberius::Config::new();
        let host = config.host.as_deref().unwrap_or("localhost");
        let port = config.port.unwrap_or(1433);
        tib.host(host);
        tib.port(port);
        if let Some(database) = &config.database {
            tib.database(database);
        }
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            tib.authentication(AuthMethod::sql_server(user, password));
        }
        tib.trust_cert();

        let tcp = TcpStream::connect((host, port)).await.map_err(|e| {
            SqlFluentError::ConnectionError(format!("sql server tcp connect failed: {e}"))
        })?;
        let client = Client::connect(tib, tcp.compat_write())
            .await
            .map_err(map_mssql_err)?;
        Ok(Arc::new(MssqlDriver {
            client: Arc::new(Mutex::new(client)),
        }))
    }
}

/// A live SQL Server connection.
pub struct MssqlDriver {
    client: SharedClient,
}

impl MssqlDriver {
    async fn scalar_i64(&self, sql: &str) -> Result<i64, SqlFluentError> {
        let mut client = self.client.lock().await;
        let rows = run_query(&mut client, sql, &[]).await?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(Value::as_int)
            .unwrap_or(0))
    }
}

#[async_trait]
impl DriverConnection for MssqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn DriverStatement>, SqlFluentError> {
        Ok(Arc::new(MssqlStatement {
            client: Arc::clone(&self.client),
            sql: sql.to_string(),
        }))
    }

    async fn exec(&self, sql: &str) -> Result<u64, SqlFluentError> {
        let mut client = self.client.lock().await;
        run_execute(&mut client, sql, &[]).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), SqlFluentError> {
        let mut client = self.client.lock().await;
        client
            .simple_query(sql.to_string())
            .await
            .map(|_| ())
            .map_err(map_mssql_err)
    }

    async fn begin(&self) -> Result<(), SqlFluentError> {
        self.exec("BEGIN TRANSACTION").await.map(|_| ())
    }

    async fn commit(&self) -> Result<(), SqlFluentError> {
        self.exec("COMMIT").await.map(|_| ())
    }

    async fn rollback(&self) -> Result<(), SqlFluentError> {
        self.exec("ROLLBACK").await.map(|_| ())
    }

    async fn last_insert_id(&self) -> Result<i64, SqlFluentError> {
        self.scalar_i64("SELECT CAST(@@IDENTITY AS BIGINT)").await
    }

    fn quote(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', "''"))
    }

    async fn server_version(&self) -> Result<String, SqlFluentError> {
        let mut client = self.client.lock().await;
        let rows = run_query(
            &mut client,
            "SELECT CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128))",
            &[],
        )
        .await?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(Value::as_text)
            .unwrap_or_default()
            .to_string())
    }

    async fn ping(&self) -> Result<(), SqlFluentError> {
        let mut client = self.client.lock().await;
        run_query(&mut client, "SELECT 1", &[]).await.map(|_| ())
    }
}

struct MssqlStatement {
    client: SharedClient,
    sql: String,
}

#[async_trait]
impl DriverStatement for MssqlStatement {
    async fn query(&self, params: &[Value]) -> Result<ResultSet, SqlFluentError> {
        let mut client = self.client.lock().await;
        run_query(&mut client, &self.sql, params).await
    }

    async fn execute(&self, params: &[Value]) -> Result<u64, SqlFluentError> {
        let mut client = self.client.lock().await;
        run_execute(&mut client, &self.sql, params).await
    }

    async fn close(&self) {
        // nothing is held server-side between executions
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}
