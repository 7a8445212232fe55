//! Tests for the probe-based upsert path against an in-memory table

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_rdbc::prelude::*;
use strata_rdbc::testing::{MockConnection, MockPool};

type Table = Arc<Mutex<BTreeMap<i64, String>>>;

/// Connection backed by `id -> name`, understanding the probe, INSERT and UPDATE.
fn table_connection(table: Table) -> MockConnection {
    let probe_table = table.clone();
    MockConnection::new()
        .on_query(move |sql, params| {
            assert!(sql.starts_with("SELECT COUNT(*) AS RECORD_EXIST"), "{sql}");
            let id = params[0].as_i64().unwrap();
            let count = i64::from(probe_table.lock().contains_key(&id));
            Ok(vec![Row::new(vec!["RECORD_EXIST".into()], vec![Value::Int64(count)])])
        })
        .on_execute(move |sql, params| {
            let mut rows = table.lock();
            if sql.starts_with("INSERT") {
                let id = params[0].as_i64().unwrap();
                rows.insert(id, params[1].as_string().unwrap_or_default());
            } else if sql.starts_with("UPDATE") {
                let id = params[1].as_i64().unwrap();
                rows.insert(id, params[0].as_string().unwrap_or_default());
            }
            Ok(1)
        })
}

fn upsert(engine: &str) -> Box<dyn QueryManager> {
    let config = OutputConfig::new(engine, "people")
        .with_action(WriteMode::Upsert)
        .with_keys(["id"]);
    let platform = platform_for(engine, DefaultMessages::shared()).unwrap();
    query_manager_for(platform, Arc::new(config)).unwrap()
}

fn batch() -> Vec<Record> {
    vec![
        Record::builder().with_long("id", 1).with_string("name", "a").build(),
        Record::builder().with_long("id", 2).with_string("name", "b").build(),
    ]
}

// ==================== Scenario Tests ====================

#[tokio::test]
async fn test_two_runs_insert_then_update() {
    let table: Table = Arc::default();
    let conn = table_connection(table.clone());
    let pool = MockPool::new(conn.clone());
    let m = upsert("mysql");

    let first = m.write(&batch(), &pool).await.unwrap();
    assert_eq!(first.accepted.len(), 2);
    assert!(first.rejected.is_empty());
    assert_eq!(conn.count_prefix("INSERT"), 2);
    assert_eq!(conn.count_prefix("UPDATE"), 0);
    assert_eq!(table.lock().len(), 2);

    let second = m.write(&batch(), &pool).await.unwrap();
    assert_eq!(second.accepted.len(), 2);
    assert!(second.rejected.is_empty());
    assert_eq!(conn.count_prefix("INSERT"), 2);
    assert_eq!(conn.count_prefix("UPDATE"), 2);
    assert_eq!(
        conn.sql_log().last().unwrap(),
        "UPDATE `people` SET `name` = ? WHERE `id` = ?"
    );
}

#[tokio::test]
async fn test_mixed_batch_partitions_exclusively() {
    let table: Table = Arc::default();
    table.lock().insert(1, "old".into());
    let conn = table_connection(table.clone());
    let pool = MockPool::new(conn.clone());

    let outcome = upsert("postgres").write(&batch(), &pool).await.unwrap();

    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(conn.count_prefix("INSERT"), 1);
    assert_eq!(conn.count_prefix("UPDATE"), 1);
    assert_eq!(table.lock().get(&1), Some(&"a".to_string()));
    assert_eq!(table.lock().get(&2), Some(&"b".to_string()));
    // probe, insert and update each check out a connection
    assert_eq!(pool.checkouts(), 3);
}

#[tokio::test]
async fn test_records_without_key_rejected_before_probe() {
    let table: Table = Arc::default();
    let conn = table_connection(table.clone());
    let pool = MockPool::new(conn.clone());

    let mut records = batch();
    records.push(Record::builder().with_string("name", "keyless").build());
    let outcome = upsert("postgres").write(&records, &pool).await.unwrap();

    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].reason, "missing required query param in this record");
    assert_eq!(conn.count_prefix("SELECT"), 2);
}

#[tokio::test]
async fn test_key_only_batch_accepts_existing_rows_without_update() {
    let table: Table = Arc::default();
    table.lock().insert(1, "kept".into());
    let conn = table_connection(table.clone());
    let pool = MockPool::new(conn.clone());

    let records = vec![Record::builder().with_long("id", 1).build()];
    let outcome = upsert("postgres").write(&records, &pool).await.unwrap();

    assert_eq!(outcome.accepted, records);
    assert_eq!(conn.count_prefix("UPDATE"), 0);
    assert_eq!(table.lock().get(&1), Some(&"kept".to_string()));
}

#[tokio::test]
async fn test_probe_runs_in_transaction_when_not_auto_commit() {
    let table: Table = Arc::default();
    let conn = table_connection(table).with_auto_commit(false);
    let pool = MockPool::new(conn.clone());

    upsert("sqlserver").write(&batch(), &pool).await.unwrap();

    // probe scope, then the insert scope
    assert_eq!(conn.events(), vec!["BEGIN", "COMMIT", "BEGIN", "COMMIT"]);
    assert!(conn.statements().iter().all(|s| s.in_transaction));
}

#[tokio::test]
async fn test_probe_failure_rolls_back() {
    let conn = MockConnection::new()
        .with_auto_commit(false)
        .on_query(|_, _| Err(Error::database("no such table", Some("42P01".into()), None)));
    let pool = MockPool::new(conn.clone());

    let err = upsert("postgres").write(&batch(), &pool).await.unwrap_err();
    assert_eq!(err.sql_state(), Some("42P01"));
    assert_eq!(conn.events(), vec!["BEGIN", "ROLLBACK"]);
    assert_eq!(conn.count_prefix("INSERT"), 0);
}
