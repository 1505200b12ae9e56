//! Engine behavior exercised through a recording mock driver: statement
//! cache bounds, transaction/savepoint sequencing, and the one-shot
//! reconnect-retry path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sql_fluent::{
    ConnectionConfig, Db, Dialect, DriverConnection, DriverFactory, DriverStatement, ResultSet,
    SqlFluentError, Value,
};
use tokio::runtime::Runtime;

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
    prepares: AtomicUsize,
    connects: AtomicUsize,
    /// Driver codes the next executions should fail with, consumed in order.
    fail_codes: Mutex<VecDeque<i64>>,
}

impl Recorder {
    fn log(&self, entry: impl Into<String>) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry.into());
        }
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn next_failure(&self) -> Option<i64> {
        self.fail_codes.lock().ok().and_then(|mut codes| codes.pop_front())
    }

    fn fail_next(&self, code: i64) {
        if let Ok(mut codes) = self.fail_codes.lock() {
            codes.push_back(code);
        }
    }
}

struct MockFactory {
    recorder: Arc<Recorder>,
    dialect: Dialect,
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
    ) -> Result<Arc<dyn DriverConnection>, SqlFluentError> {
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            recorder: self.recorder.clone(),
            dialect: self.dialect,
        }))
    }
}

struct MockConnection {
    recorder: Arc<Recorder>,
    dialect: Dialect,
}

#[async_trait]
impl DriverConnection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn DriverStatement>, SqlFluentError> {
        self.recorder.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockStatement {
            recorder: self.recorder.clone(),
            sql: sql.to_string(),
        }))
    }

    async fn exec(&self, sql: &str) -> Result<u64, SqlFluentError> {
        if let Some(code) = self.recorder.next_failure() {
            return Err(SqlFluentError::driver(Some(code), "mock failure"));
        }
        self.recorder.log(sql);
        Ok(0)
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), SqlFluentError> {
        self.recorder.log(format!("batch: {sql}"));
        Ok(())
    }

    async fn begin(&self) -> Result<(), SqlFluentError> {
        self.recorder.log("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<(), SqlFluentError> {
        self.recorder.log("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SqlFluentError> {
        self.recorder.log("ROLLBACK");
        Ok(())
    }

    async fn last_insert_id(&self) -> Result<i64, SqlFluentError> {
        Ok(42)
    }

    fn quote(&self, raw: &str) -> String {
        format!("'{}'", raw.replace('\'', "''"))
    }

    async fn server_version(&self) -> Result<String, SqlFluentError> {
        Ok("8.0.30".to_string())
    }

    async fn ping(&self) -> Result<(), SqlFluentError> {
        Ok(())
    }
}

struct MockStatement {
    recorder: Arc<Recorder>,
    sql: String,
}

#[async_trait]
impl DriverStatement for MockStatement {
    async fn query(&self, _params: &[Value]) -> Result<ResultSet, SqlFluentError> {
        if let Some(code) = self.recorder.next_failure() {
            return Err(SqlFluentError::driver(Some(code), "mock failure"));
        }
        self.recorder.log(format!("query: {}", self.sql));
        Ok(ResultSet::default())
    }

    async fn execute(&self, _params: &[Value]) -> Result<u64, SqlFluentError> {
        if let Some(code) = self.recorder.next_failure() {
            return Err(SqlFluentError::driver(Some(code), "mock failure"));
        }
        self.recorder.log(format!("execute: {}", self.sql));
        Ok(1)
    }

    async fn close(&self) {
        self.recorder.log(format!("close: {}", self.sql));
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

async fn mock_db(
    dialect: Dialect,
    config: ConnectionConfig,
    cache_capacity: usize,
) -> (Arc<Db>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let db = Arc::new(Db::with_cache_capacity(cache_capacity));
    db.add_connection_with_factory(
        "mock",
        config,
        Arc::new(MockFactory {
            recorder: recorder.clone(),
            dialect,
        }),
    )
    .await;
    (db, recorder)
}

#[test]
fn nested_transactions_issue_one_begin_and_symmetric_savepoints()
-> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        let mut builder = db.query("mock")?;
        builder.start_transaction().await?;
        builder.start_transaction().await?;
        builder.start_transaction().await?;
        assert!(builder.commit().await?);
        assert!(builder.commit().await?);
        assert!(builder.commit().await?);

        assert_eq!(recorder.entries(), vec![
            "BEGIN",
            "SAVEPOINT LEVEL1",
            "SAVEPOINT LEVEL2",
            "RELEASE SAVEPOINT LEVEL2",
            "RELEASE SAVEPOINT LEVEL1",
            "COMMIT",
        ]);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn nested_rollback_targets_the_matching_savepoint() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        let mut builder = db.query("mock")?;
        builder.start_transaction().await?;
        builder.start_transaction().await?;
        assert!(builder.rollback().await?);
        assert!(builder.commit().await?);

        assert_eq!(recorder.entries(), vec![
            "BEGIN",
            "SAVEPOINT LEVEL1",
            "ROLLBACK TO SAVEPOINT LEVEL1",
            "COMMIT",
        ]);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn statement_cache_is_bounded_fifo_per_connection() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 2).await;

        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        db.query("mock")?.raw_query("SELECT 2", &[]).await?;
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 2);

        // repeat hits the cache
        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 2);

        // third distinct statement evicts the oldest (SELECT 1)
        db.query("mock")?.raw_query("SELECT 3", &[]).await?;
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 3);
        let stats = db.statement_cache_stats().await;
        assert_eq!(stats.get("mock"), Some(&2));
        assert!(
            recorder
                .entries()
                .iter()
                .any(|entry| entry == "close: SELECT 1"),
            "evicted statement should be closed"
        );

        // the evicted statement must be re-prepared
        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 4);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn connection_loss_reconnects_and_retries_once() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        // warm the connection, then lose it on the next execution
        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

        recorder.fail_next(2006); // CR_SERVER_GONE_ERROR
        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);

        // non-transient driver errors surface without a reconnect
        recorder.fail_next(1064);
        let err = db
            .query("mock")?
            .raw_query("SELECT 1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.driver_code(), Some(1064));
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn reconnect_is_skipped_when_disabled_or_exhausted() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let config = ConnectionConfig::mysql("h", "d").with_auto_reconnect(false);
        let (db, recorder) = mock_db(Dialect::MySql, config, 16).await;

        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        recorder.fail_next(2006);
        let err = db
            .query("mock")?
            .raw_query("SELECT 1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.driver_code(), Some(2006));
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

        let config = ConnectionConfig::mysql("h", "d").with_max_reconnect_attempts(0);
        let (db, recorder) = mock_db(Dialect::MySql, config, 16).await;
        db.query("mock")?.raw_query("SELECT 1", &[]).await?;
        recorder.fail_next(2006);
        assert!(db.query("mock")?.raw_query("SELECT 1", &[]).await.is_err());
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn parameter_count_must_match_placeholders() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        let err = db
            .query("mock")?
            .raw_query("SELECT ?, ?", &[Value::Int(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::ParameterError(_)));
        // rejected before anything reached the driver
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);

        // literal and commented question marks are not placeholders
        db.query("mock")?
            .raw_query("SELECT '?' -- ?", &[])
            .await?;
        assert_eq!(recorder.prepares.load(Ordering::SeqCst), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn uncached_exec_retry_resets_the_attempt_counter() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let config = ConnectionConfig::mysql("h", "d").with_max_reconnect_attempts(1);
        let (db, recorder) = mock_db(Dialect::MySql, config, 16).await;

        db.query("mock")?.lock(&["t"]).await?;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);

        recorder.fail_next(2006);
        db.query("mock")?.lock(&["t"]).await?;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);

        // a later loss must get a fresh attempt budget
        recorder.fail_next(2006);
        db.query("mock")?.lock(&["t"]).await?;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 3);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn splice_values_never_reach_bind_time() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, _recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        let err = db
            .query("mock")?
            .raw_query("SELECT ?", &[Value::Column("users.id".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::ParameterError(_)));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn mysql_dml_renders_placeholders_and_tail() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let (db, recorder) =
            mock_db(Dialect::MySql, ConnectionConfig::mysql("h", "d"), 16).await;

        db.query("mock")?
            .where_eq("id", 5)?
            .order_by("id", "ASC")?
            .limit(10)
            .update("t", &[("hits", sql_fluent::SetValue::inc(1.0)?)])
            .await?;

        let entries = recorder.entries();
        assert!(
            entries.iter().any(|entry| entry
                == "execute: UPDATE `t` SET `hits` = `hits` + 1 WHERE `id` = ? ORDER BY `id` ASC LIMIT 10"),
            "unexpected statements: {entries:?}"
        );

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
