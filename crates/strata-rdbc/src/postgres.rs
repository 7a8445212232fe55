//! PostgreSQL backend for strata-rdbc
//!
//! Implements the connection traits on top of `tokio-postgres`. Server errors
//! keep their SQLSTATE so platforms can recognize "table already exists".

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Convert a Value to a tokio-postgres parameter. When the statement's
/// parameter type is known, NULLs and timestamps are typed to match it.
fn value_to_sql(value: &Value, ty: Option<&Type>) -> BoxedParam {
    match value {
        Value::Null => typed_null(ty),
        Value::Bool(b) => Box::new(*b),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::DateTimeTz(dt) if ty == Some(&Type::TIMESTAMPTZ) => Box::new(*dt),
        // TIMESTAMP columns hold UTC wall-clock time
        Value::DateTimeTz(dt) => Box::new(dt.naive_utc()),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn typed_null(ty: Option<&Type>) -> BoxedParam {
    match ty {
        Some(&Type::BOOL) => Box::new(Option::<bool>::None),
        Some(&Type::INT2) => Box::new(Option::<i16>::None),
        Some(&Type::INT4) => Box::new(Option::<i32>::None),
        Some(&Type::INT8) => Box::new(Option::<i64>::None),
        Some(&Type::FLOAT4) => Box::new(Option::<f32>::None),
        Some(&Type::FLOAT8) => Box::new(Option::<f64>::None),
        Some(&Type::BYTEA) => Box::new(Option::<Vec<u8>>::None),
        Some(&Type::TIMESTAMP) => Box::new(Option::<chrono::NaiveDateTime>::None),
        Some(&Type::TIMESTAMPTZ) => Box::new(Option::<chrono::DateTime<chrono::Utc>>::None),
        Some(&Type::JSON) | Some(&Type::JSONB) => Box::new(Option::<serde_json::Value>::None),
        _ => Box::new(Option::<String>::None),
    }
}

fn bind(params: &[Value], types: &[Type]) -> Vec<BoxedParam> {
    params
        .iter()
        .enumerate()
        .map(|(i, v)| value_to_sql(v, types.get(i)))
        .collect()
}

fn as_refs(boxed: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect()
}

/// Map a driver error, keeping SQLSTATE for server-side failures
fn pg_error(e: tokio_postgres::Error, sql: &str) -> Error {
    match e.as_db_error() {
        Some(db) => Error::database(db.message(), Some(db.code().code().to_string()), None)
            .with_sql(sql),
        None => Error::query_with_sql(e.to_string(), sql),
    }
}

fn tx_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(|n| Value::Int32(i32::from(n))),
        Type::INT4 => get::<i32>(row, idx).map(Value::Int32),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int64),
        Type::FLOAT4 => get::<f32>(row, idx).map(Value::Float32),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::Float64),
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(Value::Bytes),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx).map(|dt| Value::DateTimeTz(dt.and_utc())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx).map(Value::DateTimeTz),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx).map(Value::Json),
        Type::UUID => get::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        // text-like and anything else
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    auto_commit: bool,
    closed: AtomicBool,
}

impl PgConnection {
    /// Wrap a tokio-postgres client
    pub fn new(client: tokio_postgres::Client, auto_commit: bool) -> Self {
        Self {
            client: Arc::new(client),
            auto_commit,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let boxed = bind(params, &[]);
        let rows = self
            .client
            .query(sql, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let boxed = bind(params, &[]);
        self.client
            .execute(sql, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| pg_error(e, sql))?;

        Ok(Box::new(PgPreparedStatement {
            client: Arc::clone(&self.client),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.client.batch_execute("BEGIN").await.map_err(tx_error)?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Arc<tokio_postgres::Client>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let boxed = bind(params, self.statement.params());
        self.client
            .execute(&self.statement, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, &self.sql))
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        let boxed = bind(params, self.statement.params());
        let rows = self
            .client
            .query(&self.statement, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, &self.sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

/// PostgreSQL transaction over `BEGIN`/`COMMIT`/`ROLLBACK`
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let boxed = bind(params, &[]);
        let rows = self
            .client
            .query(sql, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let boxed = bind(params, &[]);
        self.client
            .execute(sql, &as_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| pg_error(e, sql))?;
        Ok(Box::new(PgPreparedStatement {
            client: Arc::clone(&self.client),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.client.batch_execute("COMMIT").await.map_err(tx_error)?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await.map_err(tx_error)?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            debug!("transaction dropped without commit or rollback");
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid connection url", e))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(app) = config
            .properties
            .get("application_name")
            .or(config.application_name.as_ref())
        {
            pg_config.application_name(app);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection terminated");
            }
        });

        Ok(Box::new(PgConnection::new(client, config.auto_commit)))
    }

    fn engine(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_engine() {
        assert_eq!(PgConnectionFactory.engine(), "postgres");
    }
}
