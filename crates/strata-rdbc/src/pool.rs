//! Pooled connection provider
//!
//! Query managers only need [`ConnectionPool::get`]: every `execute` call
//! checks one connection out and the [`PooledConnection`] guard hands it back
//! when dropped. [`SimpleConnectionPool`] is a small reference implementation;
//! deployments usually plug in their own pooled data source.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_rdbc::prelude::*;
//! use strata_rdbc::postgres::PgConnectionFactory;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("postgres://localhost/db").with_max_size(4),
//!     Arc::new(PgConnectionFactory),
//! ).await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! // returned to the pool here
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Connection pool trait
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check a connection out of the pool
    async fn get(&self) -> Result<PooledConnection>;

    /// Give a connection back to the pool
    async fn return_connection(&self, conn: Box<dyn Connection>);

    /// Current number of open connections
    fn size(&self) -> usize;

    /// Close all connections and shut the pool down
    async fn close(&self) -> Result<()>;
}

/// A connection borrowed from a pool; returned on drop
pub struct PooledConnection {
    conn: Box<dyn Connection>,
    pool: Option<Arc<dyn ConnectionPool>>,
}

impl PooledConnection {
    /// Wrap a connection that goes back to `pool` when dropped
    pub fn new(conn: Box<dyn Connection>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn,
            pool: Some(pool),
        }
    }

    /// Wrap a connection owned by an external data source; dropping it just drops the connection
    pub fn detached(conn: Box<dyn Connection>) -> Self {
        Self { conn, pool: None }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let conn = std::mem::replace(&mut self.conn, Box::new(Released));
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        pool.return_connection(conn).await;
                    });
                }
                Err(_) => warn!("connection dropped outside a runtime, not returned to pool"),
            }
        }
    }
}

/// Placeholder left behind once the real connection went back to the pool.
struct Released;

#[async_trait]
impl Connection for Released {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn prepare(&self, _sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Err(Error::connection("connection already returned to pool"))
    }

    async fn is_valid(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Connections opened eagerly
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Create pool config from a prepared connection config
    pub fn from_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Semaphore-bounded pool with LIFO idle reuse.
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    shutdown: AtomicBool,
    self_ref: Weak<SimpleConnectionPool>,
}

impl SimpleConnectionPool {
    /// Create a pool and open `min_size` connections eagerly
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        if config.max_size == 0 {
            return Err(Error::config("pool max_size must be at least 1"));
        }

        let pool = Arc::new_cyclic(|weak| Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config: config.clone(),
            factory,
            total_connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            self_ref: weak.clone(),
        });

        for _ in 0..config.min_size.min(config.max_size) {
            let conn = pool.create_connection().await?;
            pool.idle.lock().await.push(conn);
        }

        debug!(
            engine = pool.factory.engine(),
            min_size = config.min_size,
            max_size = config.max_size,
            "connection pool ready"
        );
        Ok(pool)
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::AcqRel);
        Ok(conn)
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: "pool is shut down".to_string(),
            });
        }

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| Error::PoolExhausted {
                message: format!(
                    "timeout waiting for connection ({}ms)",
                    self.config.acquire_timeout.as_millis()
                ),
            })?
            .map_err(|_| Error::PoolExhausted {
                message: "pool semaphore closed".to_string(),
            })?;

        let reused = {
            let mut idle = self.idle.lock().await;
            let mut found = None;
            while let Some(conn) = idle.pop() {
                if !self.config.test_on_borrow || conn.is_valid().await {
                    found = Some(conn);
                    break;
                }
                self.total_connections.fetch_sub(1, Ordering::AcqRel);
            }
            found
        };

        let conn = match reused {
            Some(conn) => conn,
            None => self.create_connection().await?,
        };

        let pool = self.self_ref.upgrade().ok_or_else(|| Error::PoolExhausted {
            message: "pool has been dropped".to_string(),
        })?;

        // released again in return_connection
        permit.forget();
        Ok(PooledConnection::new(conn, pool))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>) {
        self.semaphore.add_permits(1);

        if self.shutdown.load(Ordering::Acquire) {
            let _ = conn.close().await;
            self.total_connections.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        self.idle.lock().await.push(conn);
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let mut idle = self.idle.lock().await;
        for conn in idle.drain(..) {
            let _ = conn.close().await;
            self.total_connections.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new("postgres://localhost/test")
            .with_min_size(2)
            .with_max_size(8)
            .with_acquire_timeout(Duration::from_secs(5))
            .with_test_on_borrow(false);

        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 8);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert!(!config.test_on_borrow);
    }

    #[tokio::test]
    async fn test_released_placeholder_refuses_work() {
        let released = Released;
        assert!(!released.is_valid().await);
        assert!(released.execute("SELECT 1", &[]).await.is_err());
    }
}
