//! Tests for strata-rdbc insert/update/delete query managers

use std::sync::Arc;
use strata_rdbc::prelude::*;
use strata_rdbc::testing::{MockConnection, MockPool};

fn manager(config: OutputConfig) -> Box<dyn QueryManager> {
    let platform = platform_for(&config.engine, DefaultMessages::shared()).unwrap();
    query_manager_for(platform, Arc::new(config)).unwrap()
}

fn person(id: i64, name: &str) -> Record {
    Record::builder().with_long("id", id).with_string("name", name).build()
}

// ==================== Selection Tests ====================

#[test]
fn test_manager_selection() {
    let insert = manager(OutputConfig::new("postgres", "t"));
    assert_eq!(insert.operation(), WriteMode::Insert);

    let delete = manager(
        OutputConfig::new("mysql", "t")
            .with_action(WriteMode::Delete)
            .with_keys(["id"]),
    );
    assert_eq!(delete.operation(), WriteMode::Delete);
    let q = delete.build_query(&[person(1, "a")]).unwrap();
    assert!(q.sql().starts_with("DELETE FROM `t` WHERE"));

    let bulk = manager(
        OutputConfig::new("snowflake", "t")
            .with_action(WriteMode::Delete)
            .with_keys(["id"]),
    );
    let q = bulk.build_query(&[person(1, "a")]).unwrap();
    assert!(q.sql().contains(" USING "));
}

// ==================== Insert Tests ====================

#[tokio::test]
async fn test_insert_accepts_every_valid_record() {
    let conn = MockConnection::new();
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("postgres", "people"));

    let records = vec![person(1, "Ada"), person(2, "Grace")];
    let outcome = m.write(&records, &pool).await.unwrap();

    assert_eq!(outcome.accepted, records);
    assert!(outcome.rejected.is_empty());
    assert_eq!(pool.checkouts(), 1);

    let statements = conn.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"people\" (\"id\", \"name\") VALUES ($1, $2)"
    );
    assert_eq!(
        statements[1].params,
        vec![Value::Int64(2), Value::String("Grace".into())]
    );
    assert!(conn.events().is_empty());
}

#[tokio::test]
async fn test_missing_not_null_field_is_rejected() {
    let conn = MockConnection::new();
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("mysql", "people"));

    let complete = Record::builder()
        .field(SchemaEntry::new("id", FieldType::Long).not_null(), 1_i64)
        .with_string("name", "Ada")
        .build();
    let missing_id = Record::builder().with_string("name", "Nobody").build();
    let records = vec![complete.clone(), missing_id.clone()];

    let outcome = m.write(&records, &pool).await.unwrap();

    assert_eq!(outcome.accepted, vec![complete]);
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].record, missing_id);
    assert_eq!(
        outcome.rejected[0].reason,
        "missing required query param in this record"
    );
    assert_eq!(conn.count_prefix("INSERT"), 1);
}

#[tokio::test]
async fn test_present_null_counts_as_present() {
    let pool = MockPool::new(MockConnection::new());
    let m = manager(OutputConfig::new("mysql", "people"));

    let records = vec![
        Record::builder()
            .field(SchemaEntry::new("id", FieldType::Long).not_null(), 1_i64)
            .build(),
        Record::builder().with_null("id", FieldType::Long).build(),
    ];
    let outcome = m.write(&records, &pool).await.unwrap();
    assert_eq!(outcome.accepted.len(), 2);
}

#[tokio::test]
async fn test_sparse_records_bind_absent_fields_as_null() {
    let conn = MockConnection::new();
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("postgres", "people"));

    let records = vec![
        person(1, "Ada"),
        Record::builder().with_long("id", 2).with_string("email", "g@navy.mil").build(),
    ];
    m.write(&records, &pool).await.unwrap();

    let statements = conn.statements();
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"people\" (\"id\", \"name\", \"email\") VALUES ($1, $2, $3)"
    );
    assert_eq!(
        statements[0].params,
        vec![Value::Int64(1), Value::String("Ada".into()), Value::Null]
    );
    assert_eq!(
        statements[1].params,
        vec![Value::Int64(2), Value::Null, Value::String("g@navy.mil".into())]
    );
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let pool = MockPool::new(MockConnection::new());
    let outcome = manager(OutputConfig::new("postgres", "t"))
        .write(&[], &pool)
        .await
        .unwrap();
    assert!(outcome.is_empty());
    assert_eq!(pool.checkouts(), 0);
}

#[tokio::test]
async fn test_same_field_set_reuses_statement() {
    let m = manager(OutputConfig::new("postgres", "t"));
    let first = m.build_query(&[person(1, "a")]).unwrap();
    let second = m.build_query(&[person(2, "b"), person(3, "c")]).unwrap();
    let other = m
        .build_query(&[Record::builder().with_string("name", "x").with_long("id", 4).build()])
        .unwrap();

    assert!(first.same_statement(&second));
    assert!(!first.same_statement(&other));
    assert_eq!(first.fingerprint(), "id::name");
    assert_eq!(other.fingerprint(), "name::id");
}

// ==================== Transaction Tests ====================

#[tokio::test]
async fn test_non_auto_commit_commits_once() {
    let conn = MockConnection::new().with_auto_commit(false);
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("sqlserver", "people"));

    m.write(&[person(1, "a"), person(2, "b")], &pool).await.unwrap();

    assert_eq!(conn.events(), vec!["BEGIN", "COMMIT"]);
    assert!(conn.statements().iter().all(|s| s.in_transaction));
}

#[tokio::test]
async fn test_statement_failure_rolls_back_and_propagates() {
    let conn = MockConnection::new()
        .with_auto_commit(false)
        .on_execute(|_, params| {
            if params.first() == Some(&Value::Int64(2)) {
                Err(Error::database("duplicate key", Some("23505".into()), None))
            } else {
                Ok(1)
            }
        });
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("postgres", "people"));

    let err = m
        .write(&[person(1, "a"), person(2, "b"), person(3, "c")], &pool)
        .await
        .unwrap_err();

    assert_eq!(err.sql_state(), Some("23505"));
    assert_eq!(conn.events(), vec!["BEGIN", "ROLLBACK"]);
    // stops at the failing record
    assert_eq!(conn.count_prefix("INSERT"), 2);
}

#[tokio::test]
async fn test_conversion_failure_is_error_not_reject() {
    let conn = MockConnection::new().with_auto_commit(false);
    let pool = MockPool::new(conn.clone());
    let m = manager(OutputConfig::new("postgres", "t"));

    // INT field carrying a value that does not fit
    let record = Record::builder()
        .field(SchemaEntry::new("n", FieldType::Int), Value::Int64(i64::MAX))
        .build();
    let err = m.write(&[record], &pool).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::TypeConversion);
    assert_eq!(conn.events(), vec!["BEGIN", "ROLLBACK"]);
}

// ==================== Update / Delete Tests ====================

#[tokio::test]
async fn test_update_binds_set_then_keys() {
    let conn = MockConnection::new();
    let pool = MockPool::new(conn.clone());
    let m = manager(
        OutputConfig::new("oracle", "people")
            .with_action(WriteMode::Update)
            .with_keys(["id"]),
    );

    let outcome = m.write(&[person(7, "Ada")], &pool).await.unwrap();
    assert_eq!(outcome.accepted.len(), 1);

    let statement = &conn.statements()[0];
    assert_eq!(statement.sql, "UPDATE \"people\" SET \"name\" = :1 WHERE \"id\" = :2");
    assert_eq!(
        statement.params,
        vec![Value::String("Ada".into()), Value::Int64(7)]
    );
}

#[tokio::test]
async fn test_delete_rejects_records_without_key() {
    let conn = MockConnection::new();
    let pool = MockPool::new(conn.clone());
    let m = manager(
        OutputConfig::new("postgres", "people")
            .with_action(WriteMode::Delete)
            .with_keys(["id"]),
    );

    let records = vec![
        person(1, "a"),
        Record::builder().with_null("id", FieldType::Long).with_string("name", "b").build(),
        Record::builder().with_string("name", "c").build(),
    ];
    let outcome = m.write(&records, &pool).await.unwrap();

    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.rejected.len(), 2);
    assert_eq!(outcome.len(), records.len());
    assert_eq!(conn.sql_log(), vec!["DELETE FROM \"people\" WHERE \"id\" = $1"]);
}

#[test]
fn test_keys_matched_by_original_name() {
    let m = manager(
        OutputConfig::new("postgres", "orders")
            .with_action(WriteMode::Update)
            .with_keys(["Order Id"]),
    );
    let record = Record::builder()
        .field(
            SchemaEntry::new("order_id", FieldType::Long).with_original_name("Order Id"),
            1_i64,
        )
        .with_string("status", "shipped")
        .build();

    let q = m.build_query(&[record]).unwrap();
    assert_eq!(
        q.sql(),
        "UPDATE \"orders\" SET \"status\" = $1 WHERE \"order_id\" = $2"
    );
}

#[test]
fn test_original_column_names_in_statements() {
    let m = manager(OutputConfig::new("mysql", "t").with_original_column_names(true));
    let record = Record::builder()
        .field(
            SchemaEntry::new("first_name", FieldType::String).with_original_name("First Name"),
            "Ada",
        )
        .build();
    let q = m.build_query(&[record]).unwrap();
    assert_eq!(q.sql(), "INSERT INTO `t` (`First Name`) VALUES (?)");
}
