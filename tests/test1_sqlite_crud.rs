#![cfg(feature = "sqlite")]

use std::sync::Arc;

use sql_fluent::{ConnectionConfig, Db, Fetched, SetValue, SqlFluentError, Value};
use tokio::runtime::Runtime;

async fn seeded_db() -> Result<Arc<Db>, SqlFluentError> {
    let db = Arc::new(Db::new());
    db.add_connection("main", ConnectionConfig::sqlite(":memory:"))
        .await?;
    db.execute_batch(
        "main",
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            age INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            score REAL
        );",
    )
    .await?;
    Ok(db)
}

async fn count_users(db: &Arc<Db>) -> Result<i64, SqlFluentError> {
    let value = db.query("main")?.get_value("users", "COUNT(*)").await?;
    Ok(value.and_then(|v| v.as_int()).unwrap_or(0))
}

#[test]
fn insert_get_update_delete_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;

        let first = db
            .query("main")?
            .insert("users", &[
                ("name", SetValue::of("alice")),
                ("age", SetValue::of(30)),
                ("score", SetValue::of(9.5)),
            ])
            .await?;
        assert_eq!(first, Some(1));

        let second = db
            .query("main")?
            .insert("users", &[
                ("name", SetValue::of("bob")),
                ("age", SetValue::of(41)),
                ("active", SetValue::of(false)),
            ])
            .await?;
        assert_eq!(second, Some(2));

        let fetched = db
            .query("main")?
            .where_eq("name", "alice")?
            .get("users")
            .await?;
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("age").and_then(Value::as_int), Some(30));
        assert_eq!(rows[0].get("score").and_then(Value::as_float), Some(9.5));

        let one = db
            .query("main")?
            .where_eq("name", "bob")?
            .get_one("users")
            .await?
            .expect("bob exists");
        assert_eq!(one.get("active").and_then(Value::as_bool), Some(false));

        assert!(db.query("main")?.where_eq("id", 1)?.has("users").await?);
        assert!(!db.query("main")?.where_eq("id", 99)?.has("users").await?);

        let touched = db
            .query("main")?
            .where_eq("name", "alice")?
            .update("users", &[("age", SetValue::inc(1.0)?)])
            .await?;
        assert_eq!(touched, 1);
        let age = db
            .query("main")?
            .where_eq("name", "alice")?
            .get_value("users", "age")
            .await?;
        assert_eq!(age.and_then(|v| v.as_int()), Some(31));

        let removed = db
            .query("main")?
            .where_eq("name", "bob")?
            .delete("users")
            .await?;
        assert_eq!(removed, 1);
        assert_eq!(count_users(&db).await?, 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn where_variants_narrow_results() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name", "age"],
                vec![
                    vec![SetValue::of("a"), SetValue::of(10)],
                    vec![SetValue::of("b"), SetValue::of(20)],
                    vec![SetValue::of("c"), SetValue::of(30)],
                    vec![SetValue::of("d"), SetValue::of(Value::Null)],
                ],
            )
            .await?;

        let fetched = db
            .query("main")?
            .where_in("age", vec![Value::Int(10), Value::Int(30)])?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 2);

        let fetched = db
            .query("main")?
            .where_between("age", 15, 25)?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 1);

        let fetched = db.query("main")?.where_is_null("age")?.get("users").await?;
        assert_eq!(fetched.len(), 1);
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows[0].get("name").and_then(Value::as_text), Some("d"));

        // equality against an explicit NULL value renders IS NULL too
        let fetched = db
            .query("main")?
            .where_eq("age", Value::Null)?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 1);

        let fetched = db
            .query("main")?
            .where_eq("age", 10)?
            .or_where_eq("name", "c")?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 2);

        let fetched = db
            .query("main")?
            .where_raw("age > ? AND name != ?", vec![Value::Int(5), "c".into()])?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 2);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn ordering_limit_and_offset() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name", "age"],
                vec![
                    vec![SetValue::of("a"), SetValue::of(30)],
                    vec![SetValue::of("b"), SetValue::of(10)],
                    vec![SetValue::of("c"), SetValue::of(20)],
                ],
            )
            .await?;

        let fetched = db
            .query("main")?
            .order_by("age", "ASC")?
            .limit(2)
            .offset(1)
            .get("users")
            .await?;
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").and_then(Value::as_text), Some("c"));
        assert_eq!(rows[1].get("name").and_then(Value::as_text), Some("a"));

        // random ordering still returns every row
        let fetched = db
            .query("main")?
            .order_by("RAND()", "ASC")?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 3);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn json_map_key_and_total_count() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name", "age"],
                vec![
                    vec![SetValue::of("a"), SetValue::of(1)],
                    vec![SetValue::of("b"), SetValue::of(2)],
                    vec![SetValue::of("c"), SetValue::of(3)],
                ],
            )
            .await?;

        let fetched = db.query("main")?.return_json().get("users").await?;
        let Fetched::Json(text) = fetched else {
            panic!("expected JSON representation");
        };
        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(parsed.as_array().map(Vec::len), Some(3));
        assert_eq!(parsed[1]["name"], "b");

        let fetched = db.query("main")?.map_key("name")?.get("users").await?;
        let Fetched::Keyed(pairs) = fetched else {
            panic!("expected keyed representation");
        };
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "a");
        assert_eq!(pairs[2].1.get("age").and_then(Value::as_int), Some(3));

        let mut builder = db.query("main")?;
        let fetched = builder.with_total_count().limit(1).get("users").await?;
        assert_eq!(fetched.len(), 1);
        assert_eq!(builder.total_count(), Some(3));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn subqueries_splice_into_conditions() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.execute_batch(
            "main",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);",
        )
        .await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name", "age"],
                vec![
                    vec![SetValue::of("a"), SetValue::of(1)],
                    vec![SetValue::of("b"), SetValue::of(2)],
                ],
            )
            .await?;
        db.query("main")?
            .insert("orders", &[
                ("user_id", SetValue::of(1)),
                ("total", SetValue::of(99.0)),
            ])
            .await?;

        let mut inner = db.query("main")?;
        inner.columns(&["user_id"]).where_clause("total", ">", 50.0)?;
        let sub = inner.as_subquery("orders")?;

        let fetched = db
            .query("main")?
            .where_clause("id", "IN", Value::Subquery(sub.clone()))?
            .get("users")
            .await?;
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").and_then(Value::as_text), Some("a"));

        let fetched = db.query("main")?.where_exists(sub)?.get("users").await?;
        assert_eq!(fetched.len(), 2);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn joins_and_grouping() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.execute_batch(
            "main",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);",
        )
        .await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name"],
                vec![vec![SetValue::of("a")], vec![SetValue::of("b")]],
            )
            .await?;
        db.query("main")?
            .insert_multi(
                "orders",
                &["user_id", "total"],
                vec![
                    vec![SetValue::of(1), SetValue::of(10.0)],
                    vec![SetValue::of(1), SetValue::of(20.0)],
                    vec![SetValue::of(2), SetValue::of(5.0)],
                ],
            )
            .await?;

        let fetched = db
            .query("main")?
            .columns(&["users.name", "SUM(orders.total) AS spent"])
            .join("orders", "orders.user_id = users.id", "LEFT")?
            .group_by("users.name")?
            .having("spent", ">", 10.0)?
            .get("users")
            .await?;
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").and_then(Value::as_text), Some("a"));
        assert_eq!(rows[0].get("spent").and_then(Value::as_float), Some(30.0));

        let fetched = db
            .query("main")?
            .join_as("orders", "o", "o.user_id = users.id", "INNER")?
            .join_where("o", "o.total", ">", 15.0)?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn table_prefix_applies_to_every_statement() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = Arc::new(Db::new());
        db.add_connection(
            "main",
            ConnectionConfig::sqlite(":memory:").with_table_prefix("app_"),
        )
        .await?;
        db.execute_batch(
            "main",
            "CREATE TABLE app_items (id INTEGER PRIMARY KEY, label TEXT);",
        )
        .await?;

        db.query("main")?
            .insert("items", &[("label", SetValue::of("x"))])
            .await?;
        let fetched = db.query("main")?.get("items").await?;
        assert_eq!(fetched.len(), 1);

        db.set_prefix("main", None);
        let fetched = db.query("main")?.get("app_items").await?;
        assert_eq!(fetched.len(), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn raw_queries_bind_positionally() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert("users", &[("name", SetValue::of("raw")), ("age", SetValue::of(7))])
            .await?;

        let row = db
            .query("main")?
            .raw_query_one("SELECT name, age FROM users WHERE age = ?", &[Value::Int(7)])
            .await?
            .expect("row matches");
        assert_eq!(row.get("name").and_then(Value::as_text), Some("raw"));

        let value = db
            .query("main")?
            .raw_query_value("SELECT age FROM users WHERE name = ?", &["raw".into()])
            .await?;
        assert_eq!(value.and_then(|v| v.as_int()), Some(7));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn snapshot_pagination_and_last_query() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;
        db.query("main")?
            .insert_multi(
                "users",
                &["name", "age", "score"],
                vec![
                    vec![SetValue::of("a"), SetValue::of(1), SetValue::of(0.5)],
                    vec![SetValue::of("b"), SetValue::of(2), SetValue::of(5.0)],
                    vec![SetValue::of("c"), SetValue::of(3), SetValue::of(1.0)],
                    vec![SetValue::of("d"), SetValue::of(4), SetValue::of(10.0)],
                    vec![SetValue::of("e"), SetValue::of(5), SetValue::of(2.0)],
                ],
            )
            .await?;

        // column-vs-column predicate, no bound value
        let fetched = db
            .query("main")?
            .where_expr("age > score")?
            .get("users")
            .await?;
        assert_eq!(fetched.len(), 3);

        // page 2 of 2-row pages, age-ordered: c, d
        let fetched = db
            .query("main")?
            .order_by("age", "ASC")?
            .page(2, 2)
            .get("users")
            .await?;
        let rows = fetched.rows().expect("plain rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").and_then(Value::as_text), Some("c"));
        assert_eq!(rows[1].get("name").and_then(Value::as_text), Some("d"));

        // a snapshot keeps the accumulated clauses after the source resets
        let mut base = db.query("main")?;
        base.where_clause("age", ">", 2)?;
        let mut copy = base.snapshot();
        assert_eq!(base.get("users").await?.len(), 3);
        let fetched = copy.where_clause("age", "<", 5)?.get("users").await?;
        assert_eq!(fetched.len(), 2);

        let mut builder = db.query("main")?;
        builder.where_eq("id", 1)?.get("users").await?;
        let sql = builder.last_query().expect("statement was rendered");
        assert!(sql.contains("FROM \"users\""), "unexpected SQL: {sql}");
        assert!(sql.contains("\"id\" = ?"), "unexpected SQL: {sql}");

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn mysql_only_statements_are_refused_elsewhere() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = seeded_db().await?;

        let err = db
            .query("main")?
            .replace("users", &[("name", SetValue::of("x"))])
            .await
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::UnsupportedOperation(_)));

        let err = db
            .query("main")?
            .on_duplicate(&["age"], None)
            .insert("users", &[("name", SetValue::of("x"))])
            .await
            .unwrap_err();
        assert!(matches!(err, SqlFluentError::UnsupportedOperation(_)));

        let err = db.query("main")?.lock(&["users"]).await.unwrap_err();
        assert!(matches!(err, SqlFluentError::UnsupportedOperation(_)));

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
