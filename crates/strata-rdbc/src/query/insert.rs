use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    execute_rows, required_params_present, target_table, BatchOutcome, BuiltQuery, QueryCache,
    QueryManager, QueryParam,
};
use crate::config::{OutputConfig, WriteMode};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, Schema};

/// `INSERT INTO t (c1, ..) VALUES (p1, ..)` over the batch's field union
pub struct InsertQuery {
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
    cache: QueryCache,
}

impl InsertQuery {
    /// Create an insert manager
    pub fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        Self {
            platform,
            config,
            cache: QueryCache::default(),
        }
    }

    /// Statements built so far
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn build(&self, schema: &Schema) -> Result<BuiltQuery> {
        if schema.is_empty() {
            return Err(Error::schema("cannot insert records without fields"));
        }
        let use_original = self.config.use_original_column_name;
        let columns: Vec<String> = schema
            .entries()
            .iter()
            .map(|e| self.platform.identifier(e.column_name(use_original)))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len())
            .map(|i| self.platform.placeholder(i))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target_table(self.platform.as_ref(), &self.config),
            columns.join(", "),
            placeholders.join(", ")
        );
        debug!(table = %self.config.table, sql = %sql, "built insert statement");

        let params = schema
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| QueryParam {
                ordinal: i + 1,
                entry: entry.clone(),
                key: false,
            })
            .collect();
        Ok(BuiltQuery::new(schema.fingerprint(), sql, params))
    }
}

#[async_trait]
impl QueryManager for InsertQuery {
    fn operation(&self) -> WriteMode {
        WriteMode::Insert
    }

    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery> {
        let schema = Schema::union(records);
        self.cache
            .get_or_build(&schema.fingerprint(), || self.build(&schema))
    }

    fn validate_query_param(&self, query: &BuiltQuery, record: &Record) -> bool {
        required_params_present(query, record)
    }

    async fn execute(
        &self,
        query: &BuiltQuery,
        records: &[Record],
        pool: &dyn ConnectionPool,
    ) -> Result<BatchOutcome> {
        execute_rows(self, self.platform.as_ref(), &self.config, query, records, pool).await
    }
}
