#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::sync::Mutex;

use sql_fluent::safety::{SecurityEvent, SecuritySink};
use sql_fluent::{ConnectionConfig, Db, SecurityEventKind, SetValue, SqlFluentError, Value};
use tokio::runtime::Runtime;

#[derive(Default)]
struct CollectingSink {
    kinds: Mutex<Vec<SecurityEventKind>>,
}

impl SecuritySink for CollectingSink {
    fn on_security_event(&self, event: &SecurityEvent) {
        if let Ok(mut kinds) = self.kinds.lock() {
            kinds.push(event.kind);
        }
    }
}

impl CollectingSink {
    fn kinds(&self) -> Vec<SecurityEventKind> {
        self.kinds.lock().map(|k| k.clone()).unwrap_or_default()
    }
}

async fn seeded_db() -> Result<Arc<Db>, SqlFluentError> {
    let db = Arc::new(Db::new());
    db.add_connection("main", ConnectionConfig::sqlite(":memory:"))
        .await?;
    db.execute_batch(
        "main",
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age INTEGER);",
    )
    .await?;
    Ok(db)
}

#[test]
fn rejected_raw_expressions_emit_injection_events() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        let sink = Arc::new(CollectingSink::default());
        db.security().set_sink(sink.clone());

        let err = db
            .query("main")?
            .where_raw("1; DROP TABLE users", vec![])
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::UnsafeExpression(_)));
        assert_eq!(sink.kinds(), vec![SecurityEventKind::SqlInjectionAttempt]);
        assert_eq!(db.security().status().events_emitted, 1);

        // a valid raw predicate emits nothing
        db.query("main")?
            .where_raw("age > ?", vec![Value::Int(1)])?
            .get("users")
            .await?;
        assert_eq!(sink.kinds().len(), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn malformed_identifiers_are_rejected_and_reported() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        let sink = Arc::new(CollectingSink::default());
        db.security().set_sink(sink.clone());

        let err = db
            .query("main")?
            .where_eq("name; DROP TABLE users", 1)
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::InvalidIdentifier(_)));
        let kinds = sink.kinds();
        assert!(kinds.contains(&SecurityEventKind::SqlInjectionAttempt));
        assert!(kinds.contains(&SecurityEventKind::InvalidIdentifier));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn disabled_monitor_stays_silent() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        let sink = Arc::new(CollectingSink::default());
        db.security().set_sink(sink.clone());
        db.security().set_enabled(false);

        let err = db
            .query("main")?
            .where_raw("1; DROP TABLE users", vec![])
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::UnsafeExpression(_)));
        assert!(sink.kinds().is_empty());

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn trace_masks_literals_and_names_the_operation() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert("users", &[("name", SetValue::of("ada"))])
            .await?;
        db.trace().clear();

        db.query("main")?
            .raw_query("SELECT * FROM users WHERE name = 'secret'", &[])
            .await?;
        db.query("main")?.where_eq("age", 1)?.get("users").await?;

        let entries = db.trace().entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].query.contains("secret"));
        assert!(entries[0].query.contains("'?'"));
        assert_eq!(entries[0].caller, "raw_query");
        assert_eq!(entries[1].caller, "get(users)");

        db.trace().set_enabled(false);
        db.query("main")?.get("users").await?;
        assert_eq!(db.trace().entries().len(), 2);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
