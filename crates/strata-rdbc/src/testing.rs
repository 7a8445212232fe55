//! Scriptable in-memory connection and pool
//!
//! [`MockConnection`] records every statement it sees (with its parameters and
//! whether it ran inside a transaction) and answers through handlers the test
//! installs. Clones share the same log, so a test can keep one handle while
//! the pool hands out others.
//!
//! ```rust
//! use strata_rdbc::testing::{MockConnection, MockPool};
//! use strata_rdbc::types::{Row, Value};
//!
//! let conn = MockConnection::new().on_query(|_sql, _params| {
//!     Ok(vec![Row::new(vec!["RECORD_EXIST".into()], vec![Value::Int64(0)])])
//! });
//! let pool = MockPool::new(conn.clone());
//! assert_eq!(pool.checkouts(), 0);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connection::{Connection, PreparedStatement, Transaction};
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::types::{Row, Value};

type QueryHandler = Arc<dyn Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync>;
type ExecuteHandler = Arc<dyn Fn(&str, &[Value]) -> Result<u64> + Send + Sync>;

/// One statement seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedStatement {
    /// Statement text
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
    /// Whether it ran inside a transaction
    pub in_transaction: bool,
}

#[derive(Default)]
struct MockState {
    statements: Vec<LoggedStatement>,
    events: Vec<&'static str>,
}

/// Connection double with scriptable results
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    query: QueryHandler,
    execute: ExecuteHandler,
    auto_commit: bool,
    fail_rollback: bool,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// Auto-commit connection: queries return no rows, statements affect one row
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            query: Arc::new(|_, _| Ok(Vec::new())),
            execute: Arc::new(|_, _| Ok(1)),
            auto_commit: true,
            fail_rollback: false,
        }
    }

    /// Set auto-commit mode
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Make every rollback report an error (after logging the event)
    pub fn with_failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Answer queries with `handler`
    pub fn on_query<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        self.query = Arc::new(handler);
        self
    }

    /// Answer statements with `handler`
    pub fn on_execute<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<u64> + Send + Sync + 'static,
    {
        self.execute = Arc::new(handler);
        self
    }

    /// Every statement seen so far
    pub fn statements(&self) -> Vec<LoggedStatement> {
        self.state.lock().statements.clone()
    }

    /// Text of every statement seen so far
    pub fn sql_log(&self) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Statements whose text starts with `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|s| s.sql.starts_with(prefix))
            .count()
    }

    /// Transaction events in order (`BEGIN`, `COMMIT`, `ROLLBACK`)
    pub fn events(&self) -> Vec<&'static str> {
        self.state.lock().events.clone()
    }

    fn log(&self, sql: &str, params: &[Value], in_transaction: bool) {
        self.state.lock().statements.push(LoggedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction,
        });
    }

    fn event(&self, event: &'static str) {
        self.state.lock().events.push(event);
    }

    fn run_query(&self, sql: &str, params: &[Value], in_transaction: bool) -> Result<Vec<Row>> {
        self.log(sql, params, in_transaction);
        (self.query)(sql, params)
    }

    fn run_execute(&self, sql: &str, params: &[Value], in_transaction: bool) -> Result<u64> {
        self.log(sql, params, in_transaction);
        (self.execute)(sql, params)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run_query(sql, params, false)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run_execute(sql, params, false)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(MockPreparedStatement {
            sql: sql.to_string(),
            conn: self.clone(),
            in_transaction: false,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.event("BEGIN");
        Ok(Box::new(MockTransaction { conn: self.clone() }))
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Prepared statement routed back to its [`MockConnection`]
pub struct MockPreparedStatement {
    sql: String,
    conn: MockConnection,
    in_transaction: bool,
}

#[async_trait]
impl PreparedStatement for MockPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.conn.run_execute(&self.sql, params, self.in_transaction)
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        self.conn.run_query(&self.sql, params, self.in_transaction)
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

/// Transaction that logs its boundaries
pub struct MockTransaction {
    conn: MockConnection,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.conn.run_query(sql, params, true)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.conn.run_execute(sql, params, true)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Ok(Box::new(MockPreparedStatement {
            sql: sql.to_string(),
            conn: self.conn.clone(),
            in_transaction: true,
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.conn.event("COMMIT");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.conn.event("ROLLBACK");
        if self.conn.fail_rollback {
            return Err(Error::transaction("connection lost during rollback"));
        }
        Ok(())
    }
}

/// Pool that hands out clones of one [`MockConnection`] and counts checkouts
pub struct MockPool {
    conn: MockConnection,
    checkouts: AtomicUsize,
    closed: AtomicBool,
}

impl MockPool {
    /// Pool over `conn`
    pub fn new(conn: MockConnection) -> Self {
        Self {
            conn,
            checkouts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of `get` calls served
    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::Relaxed)
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn get(&self) -> Result<PooledConnection> {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection::detached(Box::new(self.conn.clone())))
    }

    async fn return_connection(&self, _conn: Box<dyn Connection>) {}

    fn size(&self) -> usize {
        1
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
