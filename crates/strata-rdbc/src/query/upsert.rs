use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    begin_scope, finish_scope, key_params_present, key_predicate, required_params_present,
    resolve_keys, scope_executor, target_table, BatchOutcome, BuiltQuery, InsertQuery, QueryCache,
    QueryManager, QueryParam, Reject, UpdateQuery,
};
use crate::config::{OutputConfig, WriteMode};
use crate::connection::Executor;
use crate::error::Result;
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, Schema};
use crate::types::Row;

/// Result of probing a batch against the target table
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpsertPlan {
    /// Records whose key matched no row
    pub need_insert: Vec<Record>,
    /// Records whose key matched at least one row
    pub need_update: Vec<Record>,
    /// Records that failed validation
    pub rejected: Vec<Reject>,
}

/// Probe-then-partition upsert: each record's key is counted in the target
/// table, then the batch is split between an [`InsertQuery`] and an
/// [`UpdateQuery`].
///
/// Re-running a batch is safe: rows inserted by a previous attempt are
/// probed as existing and take the update path.
pub struct UpsertQuery {
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
    probes: QueryCache,
    insert: InsertQuery,
    update: UpdateQuery,
}

impl UpsertQuery {
    /// Create an upsert manager
    pub fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        Self {
            insert: InsertQuery::new(platform.clone(), config.clone()),
            update: UpdateQuery::new(platform.clone(), config.clone()),
            probes: QueryCache::default(),
            platform,
            config,
        }
    }

    fn build(&self, schema: &Schema) -> Result<BuiltQuery> {
        let keys = resolve_keys(self.platform.as_ref(), &self.config, schema, "upsert")?;
        let sql = format!(
            "SELECT COUNT(*) AS RECORD_EXIST FROM {} WHERE {}",
            target_table(self.platform.as_ref(), &self.config),
            key_predicate(
                self.platform.as_ref(),
                &keys,
                0,
                self.config.use_original_column_name
            )
        );
        debug!(table = %self.config.table, sql = %sql, "built upsert probe");

        let params = keys
            .into_iter()
            .enumerate()
            .map(|(i, entry)| QueryParam {
                ordinal: i + 1,
                entry,
                key: true,
            })
            .collect();
        Ok(BuiltQuery::new(schema.fingerprint(), sql, params))
    }

    /// Probe every record on one connection and split the batch
    pub async fn partition(
        &self,
        probe: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<UpsertPlan> {
        let conn = pool.get().await?;
        let tx = begin_scope(&*conn).await?;
        let plan = {
            let executor = scope_executor(&*conn, &tx);
            self.probe_records(&executor, probe, records).await
        };
        finish_scope(tx, plan, &self.config.table).await
    }

    async fn probe_records(
        &self,
        executor: &Executor<'_>,
        probe: &BuiltQuery,
        records: &[Record],
    ) -> Result<UpsertPlan> {
        let statement = executor.prepare(probe.sql()).await?;
        let mut plan = UpsertPlan::default();

        for record in records {
            if !self.validate_query_param(probe, record) {
                plan.rejected.push(Reject::new(
                    record.clone(),
                    self.platform.messages().missing_query_param(),
                ));
                continue;
            }
            let params = probe.bind(record)?;
            let rows = statement
                .query(&params)
                .await
                .map_err(|e| e.with_sql(probe.sql()))?;
            if record_count(rows.first()) > 0 {
                plan.need_update.push(record.clone());
            } else {
                plan.need_insert.push(record.clone());
            }
        }
        Ok(plan)
    }
}

fn record_count(row: Option<&Row>) -> i64 {
    row.and_then(|r| r.get_by_name("RECORD_EXIST").or_else(|| r.get(0)))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

#[async_trait]
impl QueryManager for UpsertQuery {
    fn operation(&self) -> WriteMode {
        WriteMode::Upsert
    }

    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery> {
        let schema = Schema::union(records);
        self.probes
            .get_or_build(&schema.fingerprint(), || self.build(&schema))
    }

    fn validate_query_param(&self, query: &BuiltQuery, record: &Record) -> bool {
        required_params_present(query, record) && key_params_present(query, record)
    }

    async fn execute(
        &self,
        query: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<BatchOutcome> {
        let plan = self.partition(query, records, pool).await?;
        info!(
            table = %self.config.table,
            insert = plan.need_insert.len(),
            update = plan.need_update.len(),
            rejected = plan.rejected.len(),
            "upsert partitioned"
        );

        let mut outcome = BatchOutcome::rejected_only(plan.rejected);
        outcome.merge(self.insert.write(&plan.need_insert, pool).await?);

        if !plan.need_update.is_empty() {
            let schema = Schema::union(&plan.need_update);
            if self.update.updatable_entries(&schema).is_empty() {
                // key-only rows already exist as-is
                outcome.accepted.extend(plan.need_update);
            } else {
                outcome.merge(self.update.write(&plan.need_update, pool).await?);
            }
        }
        Ok(outcome)
    }
}
