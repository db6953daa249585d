//! Integration tests for relational access points backed by a SQLite file.
//!
//! Tests verify that:
//! - Inserted rows can be read back through `[[name:type]]` templates
//! - Paginated readers report the total from a separate count query
//! - Upserts on a unique key never duplicate rows
//! - Query failures come back as a failed QueryInfo
//! - Transactions commit and roll back on the shared connection

use colibri_data::config::FileConfig;
use colibri_data::db::builder::{MySqlBuilder, QueryBuilder};
use colibri_data::db::{DataAccessPoint, DataAccessPoints};
use colibri_data::models::{QueryOptions, QueryType, Row, StatementType};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn config(db_path: &str) -> FileConfig {
    FileConfig::from_yaml(&format!(
        r#"
access-points:
  connections:
    local: {{ type: sqlite }}
  points:
    main: {{ connection: local, database: "{}" }}
"#,
        db_path
    ))
    .unwrap()
}

/// Access points over a fresh database file; the directory must outlive them.
async fn setup() -> (TempDir, DataAccessPoints, Arc<DataAccessPoint>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let points = DataAccessPoints::new(config(path.to_str().unwrap()));
    let ap = points.get("main").await.unwrap();
    ap.execute_ddl(
        "CREATE TABLE test (id INTEGER PRIMARY KEY AUTOINCREMENT, text TEXT, dbl REAL, code TEXT UNIQUE)",
    )
    .await
    .unwrap();
    (dir, points, ap)
}

#[tokio::test]
async fn test_insert_then_select_by_id() {
    let (_dir, points, ap) = setup().await;

    let info = ap
        .insert("test", &row(json!({"text": "hello", "dbl": 1.1})), None)
        .await
        .unwrap();
    assert!(info.is_ok(), "{:?}", info.error);
    assert_eq!(info.affected, 1);
    let id = info.insert_id.unwrap();
    assert!(id > 0);

    let options = QueryOptions::default().with_param("id", id);
    let rows = ap
        .query("select * from test where id=[[id:integer]]", options)
        .await
        .unwrap()
        .into_reader()
        .unwrap()
        .read_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["text"], json!("hello"));
    assert_eq!(rows[0]["dbl"], json!(1.1));

    points.close_all().await;
}

#[tokio::test]
async fn test_array_param_expands() {
    let (_dir, _points, ap) = setup().await;
    let rows: Vec<Row> = (1..=5)
        .map(|i| row(json!({"text": format!("t{}", i)})))
        .collect();
    ap.insert_batch("test", &rows).await.unwrap();

    let options = QueryOptions::default().with_param("ids", vec![1i64, 3, 5]);
    let mut reader = ap
        .query(
            "SELECT text FROM test WHERE id IN ([[ids:integer]]) ORDER BY id",
            options,
        )
        .await
        .unwrap()
        .into_reader()
        .unwrap();
    let texts: Vec<_> = reader.rows().map(|r| r["text"].clone()).collect();
    assert_eq!(texts, vec![json!("t1"), json!("t3"), json!("t5")]);
}

#[tokio::test]
async fn test_pagination_counts_whole_result() {
    let (_dir, _points, ap) = setup().await;
    let rows: Vec<Row> = (1..=25).map(|i| row(json!({"dbl": i}))).collect();
    let info = ap.insert_batch("test", &rows).await.unwrap();
    assert_eq!(info.affected, 25);

    let options = QueryOptions::default()
        .with_type(QueryType::Reader)
        .with_page(2, 10);
    let mut reader = ap
        .query("SELECT id FROM test ORDER BY id", options)
        .await
        .unwrap()
        .into_reader()
        .unwrap();
    assert_eq!(reader.count(), 10);
    assert_eq!(reader.affected(), Some(25));
    let first = reader.read().unwrap();
    assert_eq!(first["id"], json!(11));
    // Reading does not change the window size.
    assert_eq!(reader.count(), 10);
    let ids: Vec<_> = reader.read_all().iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids.len(), 9);
    assert_eq!(ids.first(), Some(&json!(12)));
    assert_eq!(ids.last(), Some(&json!(20)));

    // bigdata skips the count query
    let options = QueryOptions::default().with_page(3, 10);
    let reader = ap
        .query("SELECT id FROM test ORDER BY id", options)
        .await
        .unwrap()
        .into_reader()
        .unwrap();
    assert_eq!(reader.count(), 5);
    assert_eq!(reader.affected(), None);
}

#[tokio::test]
async fn test_upsert_keeps_one_row() {
    let (_dir, _points, ap) = setup().await;
    let keys = ["code".to_string()];

    let data = row(json!({"code": "k1", "text": "first"}));
    ap.insert_or_update("test", &data, &keys).await.unwrap();
    let data = row(json!({"code": "k1", "text": "second"}));
    let info = ap.insert_or_update("test", &data, &keys).await.unwrap();
    assert!(info.is_ok(), "{:?}", info.error);
    let info = ap.insert_or_update("test", &data, &keys).await.unwrap();
    assert!(info.is_ok(), "{:?}", info.error);

    let rows = ap
        .query("SELECT code, text FROM test", QueryOptions::default())
        .await
        .unwrap()
        .into_reader()
        .unwrap()
        .read_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["text"], json!("second"));
}

#[tokio::test]
async fn test_delete_with_and_without_condition() {
    let (_dir, _points, ap) = setup().await;
    let rows: Vec<Row> = (1..=4).map(|i| row(json!({"dbl": i}))).collect();
    ap.insert_batch("test", &rows).await.unwrap();

    let info = ap.delete("test", "id=1", None).await.unwrap();
    assert_eq!(info.statement_type, StatementType::Delete);
    assert_eq!(info.affected, 1);

    let info = ap.delete("test", "", None).await.unwrap();
    assert!(info.is_ok());
    assert_eq!(info.affected, 3);

    assert_eq!(
        MySqlBuilder.create_delete("test", ""),
        "TRUNCATE TABLE `test`"
    );
    assert_eq!(
        MySqlBuilder.create_delete("test", "id=1"),
        "DELETE FROM `test` WHERE id=1"
    );
}

#[tokio::test]
async fn test_reader_close_is_idempotent() {
    let (_dir, _points, ap) = setup().await;
    ap.insert("test", &row(json!({"text": "a"})), None).await.unwrap();

    let mut reader = ap
        .query("SELECT * FROM test", QueryOptions::default())
        .await
        .unwrap()
        .into_reader()
        .unwrap();
    reader.close();
    assert!(reader.read().is_none());
    reader.close();
    assert!(reader.read().is_none());
    assert!(reader.is_closed());
}

#[tokio::test]
async fn test_invalid_statement_is_embedded() {
    let (_dir, _points, ap) = setup().await;
    let info = ap
        .query("INSERT INTO test VALUES (", QueryOptions::non_info())
        .await
        .unwrap()
        .into_info()
        .unwrap();
    assert!(!info.is_ok());
    assert!(!info.error.as_deref().unwrap_or_default().is_empty());
    assert_eq!(info.affected, 0);

    // The connection stays usable afterwards.
    let info = ap.insert("test", &row(json!({"text": "ok"})), None).await.unwrap();
    assert!(info.is_ok());
}

#[tokio::test]
async fn test_missing_param_is_embedded() {
    let (_dir, _points, ap) = setup().await;
    let outcome = ap
        .query(
            "SELECT * FROM test WHERE id = [[id:integer]]",
            QueryOptions::default().with_param("other", 1i64),
        )
        .await
        .unwrap();
    assert!(outcome.error().is_some());
}

#[tokio::test]
async fn test_transaction_rollback_and_commit() {
    let (_dir, points, ap) = setup().await;

    ap.begin().await.unwrap();
    ap.insert("test", &row(json!({"text": "gone"})), None).await.unwrap();
    ap.rollback().await.unwrap();

    ap.begin().await.unwrap();
    ap.insert("test", &row(json!({"text": "kept"})), None).await.unwrap();
    ap.commit().await.unwrap();

    // A second lookup shares the same connection and sees committed data.
    let again = points.get("main").await.unwrap();
    let rows = again
        .query("SELECT text FROM test", QueryOptions::default())
        .await
        .unwrap()
        .into_reader()
        .unwrap()
        .read_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["text"], json!("kept"));
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let (dir, points, ap) = setup().await;
    ap.insert("test", &row(json!({"text": "persisted"})), None).await.unwrap();
    points.close_all().await;
    assert!(!ap.ping().await);

    let path = dir.path().join("test.db");
    let fresh = DataAccessPoints::new(config(path.to_str().unwrap()));
    let ap = fresh.get("main").await.unwrap();
    assert_eq!(ap.tables(None).await.unwrap(), vec!["test".to_string()]);
    let schema = ap.describe_table("test").await.unwrap().unwrap();
    assert!(schema.column("TEXT").is_some());
    assert!(ap.describe_table("absent").await.unwrap().is_none());
}
