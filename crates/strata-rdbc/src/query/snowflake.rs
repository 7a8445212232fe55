//! Set-based delete and upsert through a staged temporary table.
//!
//! Both managers share [`BulkLoad`]: stage the validated records into a session
//! temporary table, then apply one `DELETE ... USING` or `MERGE` statement.
//! Everything happens on a single connection checkout.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    begin_scope, finish_scope, key_params_present, required_params_present, resolve_keys,
    scope_executor, target_table, BatchOutcome, BuiltQuery, InsertQuery, QueryCache, QueryManager,
    QueryParam, Reject, UpdateQuery,
};
use crate::config::{OutputConfig, WriteMode};
use crate::connection::{Connection, Executor};
use crate::error::Result;
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, Schema, SchemaEntry};
use crate::staging::{Namespace, RowFailure, SqlPutUploader, StageUploader, StagingArea};

struct BulkLoad {
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
    staging_table: String,
    uploader: Arc<dyn StageUploader>,
}

impl BulkLoad {
    fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            staging_table: format!("{}_stage_{}", config.table, &suffix[..8]),
            platform,
            config,
            uploader: Arc::new(SqlPutUploader),
        }
    }

    /// Quoted temporary table, in the target's schema
    fn staging_ref(&self) -> String {
        self.platform
            .qualified_name(self.config.schema.as_deref(), &self.staging_table)
    }

    /// Every batch field staged, keys flagged
    fn staged_params(&self, schema: &Schema, keys: &[SchemaEntry]) -> Vec<QueryParam> {
        schema
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| QueryParam {
                ordinal: i + 1,
                entry: entry.clone(),
                key: keys.iter().any(|k| k.name == entry.name),
            })
            .collect()
    }

    /// `source."k" = <target>."k" AND ...`
    fn key_join(&self, keys: &[SchemaEntry], target: &str) -> String {
        keys.iter()
            .map(|k| {
                let column = self
                    .platform
                    .identifier(k.column_name(self.config.use_original_column_name));
                format!("source.{column} = {target}.{column}")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    async fn run(
        &self,
        manager: &dyn QueryManager,
        query: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<BatchOutcome> {
        let mut valid = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for record in records {
            if manager.validate_query_param(query, record) {
                valid.push(record.clone());
            } else {
                rejected.push(Reject::new(
                    record.clone(),
                    self.platform.messages().missing_query_param(),
                ));
            }
        }
        if valid.is_empty() {
            return Ok(BatchOutcome::rejected_only(rejected));
        }

        let conn = pool.get().await?;
        let namespace = Namespace::resolve(&*conn, self.config.schema.as_deref()).await?;
        let mut area = StagingArea::new(
            self.staging_ref(),
            namespace.table_stage(self.platform.as_ref(), &self.staging_table),
        )?;

        let loaded = self
            .load_and_apply(&*conn, &mut area, manager.operation(), query, &valid)
            .await;
        area.cleanup(&*conn).await;
        let failures = loaded?;

        let failed: HashSet<usize> = failures.iter().map(|f| f.index).collect();
        let mut outcome = BatchOutcome::rejected_only(rejected);
        for failure in failures {
            outcome
                .rejected
                .push(Reject::new(valid[failure.index].clone(), failure.reason));
        }
        outcome.accepted = valid
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !failed.contains(i))
            .map(|(_, record)| record)
            .collect();

        info!(
            table = %self.config.table,
            operation = manager.operation().as_str(),
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "bulk batch applied"
        );
        Ok(outcome)
    }

    async fn load_and_apply(
        &self,
        conn: &dyn Connection,
        area: &mut StagingArea,
        operation: WriteMode,
        query: &BuiltQuery,
        records: &[Record],
    ) -> Result<Vec<RowFailure>> {
        let use_original = self.config.use_original_column_name;
        let entries: Vec<SchemaEntry> = query.params().iter().map(|p| p.entry.clone()).collect();
        let columns: Vec<String> = entries
            .iter()
            .map(|e| e.column_name(use_original).to_string())
            .collect();

        let mut failures = area
            .write_files(records, &entries, self.config.rows_per_staging_file)
            .await?;

        if area.file_count() > 0 {
            let executor = Executor::Connection(conn);
            let target = target_table(self.platform.as_ref(), &self.config);
            // LIKE would carry NOT NULL from columns a delete never stages
            let key_columns: Option<Vec<String>> = (operation == WriteMode::Delete)
                .then(|| columns.iter().map(|c| self.platform.identifier(c)).collect());
            area.create_table(&executor, &target, key_columns.as_deref()).await?;
            area.upload(conn, self.uploader.as_ref()).await?;

            let copy = area.copy_statement(self.platform.as_ref(), &columns);
            debug!(table = %self.config.table, sql = %copy, "loading staged files");
            conn.execute(&copy, &[]).await.map_err(|e| e.with_sql(&copy))?;
            failures.extend(area.load_failures(&executor).await?);
        }

        if failures.len() >= records.len() {
            info!(table = %self.config.table, "every staged record was rejected, skipping apply");
            return Ok(failures);
        }

        let tx = begin_scope(conn).await?;
        let applied = {
            let executor = scope_executor(conn, &tx);
            executor
                .execute(query.sql(), &[])
                .await
                .map_err(|e| e.with_sql(query.sql()))
        };
        let affected = finish_scope(tx, applied, &self.config.table).await?;
        debug!(table = %self.config.table, affected, "set-based statement applied");
        Ok(failures)
    }
}

/// `DELETE FROM t USING tmp AS source WHERE source.k = t.k AND ..`
///
/// Only key columns are staged.
pub struct SnowflakeDelete {
    bulk: BulkLoad,
    cache: QueryCache,
}

impl SnowflakeDelete {
    /// Create a bulk delete manager
    pub fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        Self {
            bulk: BulkLoad::new(platform, config),
            cache: QueryCache::default(),
        }
    }

    /// Replace the stage uploader
    pub fn with_uploader(mut self, uploader: Arc<dyn StageUploader>) -> Self {
        self.bulk.uploader = uploader;
        self
    }

    fn build(&self, schema: &Schema) -> Result<BuiltQuery> {
        let bulk = &self.bulk;
        let keys = resolve_keys(bulk.platform.as_ref(), &bulk.config, schema, "delete")?;
        let target = target_table(bulk.platform.as_ref(), &bulk.config);
        let sql = format!(
            "DELETE FROM {} USING {} AS source WHERE {}",
            target,
            bulk.staging_ref(),
            bulk.key_join(&keys, &target)
        );
        debug!(table = %bulk.config.table, sql = %sql, "built bulk delete statement");
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
}

#[async_trait]
impl QueryManager for SnowflakeDelete {
    fn operation(&self) -> WriteMode {
        WriteMode::Delete
    }

    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery> {
        let schema = Schema::union(records);
        self.cache
            .get_or_build(&schema.fingerprint(), || self.build(&schema))
    }

    fn validate_query_param(&self, query: &BuiltQuery, record: &Record) -> bool {
        key_params_present(query, record)
    }

    async fn execute(
        &self,
        query: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<BatchOutcome> {
        self.bulk.run(self, query, records, pool).await
    }
}

/// `MERGE INTO t USING tmp AS source ON .. WHEN MATCHED .. WHEN NOT MATCHED ..`
pub struct SnowflakeUpsert {
    bulk: BulkLoad,
    cache: QueryCache,
    insert: InsertQuery,
    update: UpdateQuery,
}

impl SnowflakeUpsert {
    /// Create a bulk upsert manager
    pub fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        Self {
            insert: InsertQuery::new(platform.clone(), config.clone()),
            update: UpdateQuery::new(platform.clone(), config.clone()),
            bulk: BulkLoad::new(platform, config),
            cache: QueryCache::default(),
        }
    }

    /// Replace the stage uploader
    pub fn with_uploader(mut self, uploader: Arc<dyn StageUploader>) -> Self {
        self.bulk.uploader = uploader;
        self
    }

    fn build(&self, records: &[Record], schema: &Schema) -> Result<BuiltQuery> {
        let bulk = &self.bulk;
        let platform = bulk.platform.as_ref();
        let use_original = bulk.config.use_original_column_name;
        let keys = resolve_keys(platform, &bulk.config, schema, "upsert")?;
        let column = |e: &SchemaEntry| platform.identifier(e.column_name(use_original));

        let mut sql = format!(
            "MERGE INTO {} AS target USING {} AS source ON {}",
            target_table(platform, &bulk.config),
            bulk.staging_ref(),
            bulk.key_join(&keys, "target")
        );

        let updatable = self.update.updatable_entries(schema);
        if !updatable.is_empty() {
            let assignments: Vec<String> = updatable
                .iter()
                .map(|e| format!("target.{0} = source.{0}", column(e)))
                .collect();
            sql.push_str(" WHEN MATCHED THEN UPDATE SET ");
            sql.push_str(&assignments.join(", "));
        }

        let inserted = self.insert.build_query(records)?;
        let insert_columns: Vec<String> = inserted.params().iter().map(|p| column(&p.entry)).collect();
        let insert_values: Vec<String> = insert_columns.iter().map(|c| format!("source.{c}")).collect();
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            insert_columns.join(", "),
            insert_values.join(", ")
        ));

        debug!(table = %bulk.config.table, sql = %sql, "built merge statement");
        Ok(BuiltQuery::new(schema.fingerprint(), sql, bulk.staged_params(schema, &keys)))
    }
}

#[async_trait]
impl QueryManager for SnowflakeUpsert {
    fn operation(&self) -> WriteMode {
        WriteMode::Upsert
    }

    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery> {
        let schema = Schema::union(records);
        self.cache
            .get_or_build(&schema.fingerprint(), || self.build(records, &schema))
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
        self.bulk.run(self, query, records, pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultMessages;
    use crate::platform::platform_for;

    fn config(action: WriteMode) -> Arc<OutputConfig> {
        Arc::new(
            OutputConfig::new("snowflake", "customers")
                .with_action(action)
                .with_keys(["id"])
                .with_ignore_update(["created"]),
        )
    }

    fn records() -> Vec<Record> {
        vec![Record::builder()
            .with_long("id", 1)
            .with_string("name", "a")
            .with_string("created", "2024-01-01")
            .build()]
    }

    #[test]
    fn test_merge_statement() {
        let platform = platform_for("snowflake", DefaultMessages::shared()).unwrap();
        let m = SnowflakeUpsert::new(platform, config(WriteMode::Upsert));
        let q = m.build_query(&records()).unwrap();
        let tmp = m.bulk.staging_ref();

        assert_eq!(
            q.sql(),
            format!(
                r#"MERGE INTO "customers" AS target USING {tmp} AS source ON source."id" = target."id" WHEN MATCHED THEN UPDATE SET target."name" = source."name" WHEN NOT MATCHED THEN INSERT ("id", "name", "created") VALUES (source."id", source."name", source."created")"#
            )
        );
        assert_eq!(q.params().len(), 3);
        assert!(q.params()[0].key);
    }

    #[test]
    fn test_merge_without_updatable_columns_omits_matched_branch() {
        let platform = platform_for("snowflake", DefaultMessages::shared()).unwrap();
        let m = SnowflakeUpsert::new(platform, config(WriteMode::Upsert));
        let key_only = vec![Record::builder().with_long("id", 1).with_string("created", "x").build()];
        let q = m.build_query(&key_only).unwrap();
        assert!(!q.sql().contains("WHEN MATCHED"));
        assert!(q.sql().contains("WHEN NOT MATCHED THEN INSERT"));
    }

    #[test]
    fn test_bulk_delete_statement() {
        let platform = platform_for("snowflake", DefaultMessages::shared()).unwrap();
        let m = SnowflakeDelete::new(platform, config(WriteMode::Delete));
        let q = m.build_query(&records()).unwrap();
        let tmp = m.bulk.staging_ref();
        assert_eq!(
            q.sql(),
            format!(r#"DELETE FROM "customers" USING {tmp} AS source WHERE source."id" = "customers"."id""#)
        );
    }
}
