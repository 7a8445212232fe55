//! Relational output stage
//!
//! [`RecordOutput`] ties the pieces together for one target table: it selects
//! the platform and query manager once from the configuration, creates the
//! table before the first batch when asked to, and applies the configured
//! [`RejectPolicy`] to every batch outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_rdbc::prelude::*;
//!
//! let config = OutputConfig::new("postgres", "customers")
//!     .with_action(WriteMode::Upsert)
//!     .with_keys(["id"])
//!     .with_create_table(true);
//! let output = RecordOutput::new(config, pool)?;
//!
//! let outcome = output.write_batch(&records).await?;
//! for reject in &outcome.rejected {
//!     eprintln!("rejected: {}", reject.reason);
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{OutputConfig, RejectPolicy};
use crate::error::{Error, Result};
use crate::messages::{DefaultMessages, Messages};
use crate::platform::{platform_for, Platform};
use crate::pool::ConnectionPool;
use crate::query::{query_manager_for, BatchOutcome, QueryManager};
use crate::record::{Record, Schema};
use crate::table::Table;

/// Output statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputStats {
    /// Records applied
    pub records_written: u64,
    /// Records rejected
    pub records_rejected: u64,
    /// Batches applied
    pub batches_written: u64,
    /// Batches that returned an error
    pub batches_failed: u64,
    /// Total write duration (milliseconds)
    pub total_write_time_ms: u64,
    /// Average records per second
    pub records_per_second: f64,
}

/// Lock-free counters behind [`OutputStats`]
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicOutputStats {
    pub records_written: AtomicU64,
    pub records_rejected: AtomicU64,
    pub batches_written: AtomicU64,
    pub batches_failed: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicOutputStats {
    /// Record an applied batch
    pub fn record_batch(&self, outcome: &BatchOutcome, duration: Duration) {
        self.records_written
            .fetch_add(outcome.accepted.len() as u64, Ordering::Relaxed);
        self.records_rejected
            .fetch_add(outcome.rejected.len() as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a batch that failed as a whole
    pub fn record_batch_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> OutputStats {
        let records = self.records_written.load(Ordering::Relaxed);
        let time_ms = self.total_write_time_ms.load(Ordering::Relaxed);
        let rps = if time_ms > 0 {
            (records as f64 * 1000.0) / time_ms as f64
        } else {
            0.0
        };

        OutputStats {
            records_written: records,
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            total_write_time_ms: time_ms,
            records_per_second: rps,
        }
    }
}

/// Writes record batches into one table
pub struct RecordOutput {
    config: Arc<OutputConfig>,
    platform: Arc<dyn Platform>,
    manager: Box<dyn QueryManager>,
    pool: Arc<dyn ConnectionPool>,
    table_ready: OnceCell<bool>,
    stats: AtomicOutputStats,
}

impl RecordOutput {
    /// Validate the configuration and select platform and query manager
    pub fn new(config: OutputConfig, pool: Arc<dyn ConnectionPool>) -> Result<Self> {
        Self::with_messages(config, pool, DefaultMessages::shared())
    }

    /// Same as [`RecordOutput::new`] with a custom message provider
    pub fn with_messages(
        config: OutputConfig,
        pool: Arc<dyn ConnectionPool>,
        messages: Arc<dyn Messages>,
    ) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let platform = platform_for(&config.engine, messages)?;
        let manager = query_manager_for(platform.clone(), config.clone())?;

        info!(
            engine = platform.name(),
            table = %config.table,
            action = config.action.as_str(),
            "relational output ready"
        );
        Ok(Self {
            config,
            platform,
            manager,
            pool,
            table_ready: OnceCell::new(),
            stats: AtomicOutputStats::default(),
        })
    }

    /// Selected platform
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Selected query manager
    pub fn manager(&self) -> &dyn QueryManager {
        self.manager.as_ref()
    }

    /// Output configuration
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Statistics snapshot
    pub fn stats(&self) -> OutputStats {
        self.stats.snapshot()
    }

    /// Create the target table from the batch schema if configured and not yet done.
    /// Returns whether this call created it.
    pub async fn ensure_table(&self, records: &[Record]) -> Result<bool> {
        if !self.config.create_table_if_not_exists || records.is_empty() {
            return Ok(false);
        }
        if self.table_ready.initialized() {
            return Ok(false);
        }
        let created = self
            .table_ready
            .get_or_try_init(|| async {
                let table = Table::from_schema(
                    self.config.schema.clone(),
                    self.config.table.clone(),
                    &Schema::union(records),
                    &self.config.keys,
                    self.config.varchar_length,
                )?;
                let conn = self.pool.get().await?;
                self.platform
                    .create_table_if_absent(&*conn, &table, self.config.use_original_column_name)
                    .await
            })
            .await?;
        Ok(*created)
    }

    /// Write one batch and apply the reject policy
    pub async fn write_batch(&self, records: &[Record]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let start = Instant::now();

        let written = match self.ensure_table(records).await {
            Ok(_) => self.manager.write(records, self.pool.as_ref()).await,
            Err(e) => Err(e),
        };
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.record_batch_failure();
                return Err(e);
            }
        };
        self.stats.record_batch(&outcome, start.elapsed());
        debug!(
            table = %self.config.table,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "batch written"
        );

        self.apply_reject_policy(outcome)
    }

    fn apply_reject_policy(&self, outcome: BatchOutcome) -> Result<BatchOutcome> {
        if outcome.rejected.is_empty() {
            return Ok(outcome);
        }
        match self.config.reject_policy {
            RejectPolicy::Collect => Ok(outcome),
            RejectPolicy::Log => {
                for reject in &outcome.rejected {
                    warn!(table = %self.config.table, reason = %reject.reason, "record rejected");
                }
                Ok(outcome)
            }
            RejectPolicy::Fail => {
                let first = &outcome.rejected[0];
                Err(Error::query(format!(
                    "{} record(s) rejected for table {}: {}",
                    outcome.rejected.len(),
                    self.config.table,
                    first.reason
                )))
            }
        }
    }

    /// Close the underlying pool
    pub async fn close(&self) -> Result<()> {
        let stats = self.stats.snapshot();
        info!(
            table = %self.config.table,
            records_written = stats.records_written,
            records_rejected = stats.records_rejected,
            "relational output closing"
        );
        self.pool.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = AtomicOutputStats::default();
        let outcome = BatchOutcome {
            accepted: vec![Record::builder().with_long("id", 1).build()],
            rejected: Vec::new(),
        };
        stats.record_batch(&outcome, Duration::from_millis(500));
        stats.record_batch_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.records_written, 1);
        assert_eq!(snap.batches_written, 1);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.records_per_second, 2.0);
    }
}
