//! Query managers
//!
//! A [`QueryManager`] turns a homogeneous batch of records into SQL for one
//! operation (insert, update, delete, upsert), validates each record against
//! the statement's parameters, executes, and reports a [`BatchOutcome`].
//!
//! `build_query` returns an immutable [`BuiltQuery`] (SQL text plus the
//! ordinal-to-field parameter map) that the caller passes back into `execute`.
//! Built queries are cached per schema fingerprint, so batches that share the
//! same ordered field-name set reuse the same statement text.
//!
//! Row-level problems (missing required fields) become [`Reject`]s; anything
//! that fails a statement is returned as an [`Error`](crate::Error).

mod delete;
mod insert;
mod snowflake;
mod update;
mod upsert;

pub use delete::DeleteQuery;
pub use insert::InsertQuery;
pub use snowflake::{SnowflakeDelete, SnowflakeUpsert};
pub use update::UpdateQuery;
pub use upsert::{UpsertPlan, UpsertQuery};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::{OutputConfig, WriteMode};
use crate::connection::{Connection, Executor, Transaction};
use crate::converter::ValueConverter;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, SchemaEntry};
use crate::types::Value;

/// A record that could not be applied, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct Reject {
    /// The untouched input record
    pub record: Record,
    /// Human-readable reason
    pub reason: String,
}

impl Reject {
    /// Create a reject
    pub fn new(record: Record, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

/// Per-batch result: every input record is either accepted or rejected, once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Records applied to the database
    pub accepted: Vec<Record>,
    /// Records refused, with reasons
    pub rejected: Vec<Reject>,
}

impl BatchOutcome {
    /// Outcome holding only rejects
    pub fn rejected_only(rejected: Vec<Reject>) -> Self {
        Self {
            accepted: Vec::new(),
            rejected,
        }
    }

    /// Total records accounted for
    pub fn len(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    /// Whether the outcome holds no record
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }

    /// Whether nothing was rejected
    pub fn is_success(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Append another outcome
    pub fn merge(&mut self, other: BatchOutcome) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }
}

/// One bound parameter of a built statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    /// 1-based position in the statement
    pub ordinal: usize,
    /// Batch field bound at this position
    pub entry: SchemaEntry,
    /// Whether the parameter targets a key column
    pub key: bool,
}

/// SQL text and its parameter map for one schema fingerprint
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    fingerprint: Arc<str>,
    sql: Arc<str>,
    params: Arc<[QueryParam]>,
}

impl BuiltQuery {
    /// Create a built query
    pub fn new(fingerprint: impl Into<Arc<str>>, sql: impl Into<Arc<str>>, params: Vec<QueryParam>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            sql: sql.into(),
            params: params.into(),
        }
    }

    /// Statement text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Schema fingerprint this statement was built for
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Parameters in ordinal order
    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Key parameters in ordinal order
    pub fn key_params(&self) -> impl Iterator<Item = &QueryParam> {
        self.params.iter().filter(|p| p.key)
    }

    /// Whether both values come from the same cache entry
    pub fn same_statement(&self, other: &BuiltQuery) -> bool {
        Arc::ptr_eq(&self.sql, &other.sql)
    }

    /// Bind every parameter of `record` through the value converter
    pub fn bind(&self, record: &Record) -> Result<Vec<Value>> {
        self.params
            .iter()
            .map(|p| ValueConverter::for_type(p.entry.field_type).convert(record, &p.entry))
            .collect()
    }
}

/// Fingerprint-keyed statement cache
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, BuiltQuery>>,
    hits: AtomicU64,
}

impl QueryCache {
    /// Return the cached query for `fingerprint`, building it on first use
    pub fn get_or_build(
        &self,
        fingerprint: &str,
        build: impl FnOnce() -> Result<BuiltQuery>,
    ) -> Result<BuiltQuery> {
        if let Some(found) = self.entries.lock().get(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }
        let built = build()?;
        Ok(self
            .entries
            .lock()
            .entry(fingerprint.to_string())
            .or_insert(built)
            .clone())
    }

    /// Number of cached statements
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of lookups served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Batch writer for one operation against one target table
#[async_trait]
pub trait QueryManager: Send + Sync {
    /// Operation implemented
    fn operation(&self) -> WriteMode;

    /// Build (or fetch from cache) the statement for the batch's schema
    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery>;

    /// Whether `record` supplies every parameter the statement requires
    fn validate_query_param(&self, query: &BuiltQuery, record: &Record) -> bool;

    /// Execute `query` for `records` on one or more pooled connections
    async fn execute(
        &self,
        query: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<BatchOutcome>;

    /// Build then execute; an empty batch is a no-op
    async fn write(&self, records: &[Record], pool: &dyn ConnectionPool) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let query = self.build_query(records)?;
        self.execute(&query, records, pool).await
    }
}

/// Select the query manager for the configured action and engine
pub fn query_manager_for(
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
) -> Result<Box<dyn QueryManager>> {
    let snowflake = platform.name() == "snowflake";
    let manager: Box<dyn QueryManager> = match config.action {
        WriteMode::Insert => Box::new(InsertQuery::new(platform, config)),
        WriteMode::Update => Box::new(UpdateQuery::new(platform, config)),
        WriteMode::Delete if snowflake => Box::new(SnowflakeDelete::new(platform, config)),
        WriteMode::Delete => Box::new(DeleteQuery::new(platform, config)),
        WriteMode::Upsert if snowflake => Box::new(SnowflakeUpsert::new(platform, config)),
        WriteMode::Upsert => Box::new(UpsertQuery::new(platform, config)),
    };
    Ok(manager)
}

/// Non-nullable parameters must be present in the record; a present NULL counts as present.
pub(crate) fn required_params_present(query: &BuiltQuery, record: &Record) -> bool {
    query
        .params()
        .iter()
        .filter(|p| !p.entry.nullable)
        .all(|p| record.contains(&p.entry.name))
}

/// Key parameters must be present and non-null.
pub(crate) fn key_params_present(query: &BuiltQuery, record: &Record) -> bool {
    query
        .key_params()
        .all(|p| matches!(record.get(&p.entry.name), Some(v) if !v.is_null()))
}

/// Resolve configured keys (source field names) against the batch schema.
pub(crate) fn resolve_keys(
    platform: &dyn Platform,
    config: &OutputConfig,
    schema: &crate::record::Schema,
    operation: &str,
) -> Result<Vec<SchemaEntry>> {
    if config.keys.is_empty() {
        return Err(Error::missing_key(platform.messages().no_key_for_query(operation)));
    }
    config
        .keys
        .iter()
        .map(|key| {
            schema
                .entry_by_original(key)
                .cloned()
                .ok_or_else(|| Error::schema(platform.messages().no_field_for_query_param(key)))
        })
        .collect()
}

/// `k1 = p AND k2 = p` with placeholders starting after `offset` parameters
pub(crate) fn key_predicate(
    platform: &dyn Platform,
    keys: &[SchemaEntry],
    offset: usize,
    use_original: bool,
) -> String {
    keys.iter()
        .enumerate()
        .map(|(i, k)| {
            format!(
                "{} = {}",
                platform.identifier(k.column_name(use_original)),
                platform.placeholder(offset + i + 1)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Quoted `[schema.]table` of the configured target
pub(crate) fn target_table(platform: &dyn Platform, config: &OutputConfig) -> String {
    platform.qualified_name(config.schema.as_deref(), &config.table)
}

/// Open the commit scope for one checkout: a transaction unless the
/// connection auto-commits.
pub(crate) async fn begin_scope(conn: &dyn Connection) -> Result<Option<Box<dyn Transaction>>> {
    if conn.is_auto_commit() {
        Ok(None)
    } else {
        conn.begin().await.map(Some)
    }
}

/// Executor for the scope opened by [`begin_scope`]
pub(crate) fn scope_executor<'a>(
    conn: &'a dyn Connection,
    tx: &'a Option<Box<dyn Transaction>>,
) -> Executor<'a> {
    match tx {
        Some(tx) => Executor::Transaction(tx.as_ref()),
        None => Executor::Connection(conn),
    }
}

/// Commit on success, roll back and propagate on failure.
pub(crate) async fn finish_scope<T>(
    tx: Option<Box<dyn Transaction>>,
    outcome: Result<T>,
    table: &str,
) -> Result<T> {
    match (outcome, tx) {
        (Ok(value), Some(tx)) => {
            tx.commit().await?;
            Ok(value)
        }
        (Ok(value), None) => Ok(value),
        (Err(e), Some(tx)) => {
            error!(table = %table, error = %e, "batch failed, rolling back");
            if let Err(rollback) = tx.rollback().await {
                warn!(table = %table, error = %rollback, "rollback failed");
            }
            Err(e)
        }
        (Err(e), None) => {
            error!(table = %table, error = %e, "batch failed on auto-commit connection");
            Err(e)
        }
    }
}

/// Shared per-row loop: validate, bind, execute one prepared statement per record.
pub(crate) async fn execute_rows(
    manager: &dyn QueryManager,
    platform: &dyn Platform,
    config: &OutputConfig,
    query: &BuiltQuery,
    records: &[Record],
    pool: &dyn ConnectionPool,
) -> Result<BatchOutcome> {
    let conn = pool.get().await?;
    let tx = begin_scope(&*conn).await?;

    let outcome = {
        let executor = scope_executor(&*conn, &tx);
        apply_rows(&executor, manager, platform, query, records).await
    };

    let outcome = finish_scope(tx, outcome, &config.table).await?;
    if !outcome.rejected.is_empty() {
        warn!(
            table = %config.table,
            operation = manager.operation().as_str(),
            rejected = outcome.rejected.len(),
            "records rejected by validation"
        );
    }
    Ok(outcome)
}

async fn apply_rows(
    executor: &Executor<'_>,
    manager: &dyn QueryManager,
    platform: &dyn Platform,
    query: &BuiltQuery,
    records: &[Record],
) -> Result<BatchOutcome> {
    let statement = executor.prepare(query.sql()).await?;
    let mut outcome = BatchOutcome::default();

    for record in records {
        if !manager.validate_query_param(query, record) {
            outcome.rejected.push(Reject::new(
                record.clone(),
                platform.messages().missing_query_param(),
            ));
            continue;
        }
        let params = query.bind(record)?;
        statement
            .execute(&params)
            .await
            .map_err(|e| e.with_sql(query.sql()))?;
        outcome.accepted.push(record.clone());
    }
    Ok(outcome)
}
