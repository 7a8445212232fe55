use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    execute_rows, key_params_present, key_predicate, required_params_present, resolve_keys,
    target_table, BatchOutcome, BuiltQuery, QueryCache, QueryManager, QueryParam,
};
use crate::config::{OutputConfig, WriteMode};
use crate::error::Result;
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, Schema};

/// `DELETE FROM t WHERE k = p AND ..`
pub struct DeleteQuery {
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
    cache: QueryCache,
}

impl DeleteQuery {
    /// Create a delete manager
    pub fn new(platform: Arc<dyn Platform>, config: Arc<OutputConfig>) -> Self {
        Self {
            platform,
            config,
            cache: QueryCache::default(),
        }
    }

    fn build(&self, schema: &Schema) -> Result<BuiltQuery> {
        let keys = resolve_keys(self.platform.as_ref(), &self.config, schema, "delete")?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            target_table(self.platform.as_ref(), &self.config),
            key_predicate(
                self.platform.as_ref(),
                &keys,
                0,
                self.config.use_original_column_name
            )
        );
        debug!(table = %self.config.table, sql = %sql, "built delete statement");

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
impl QueryManager for DeleteQuery {
    fn operation(&self) -> WriteMode {
        WriteMode::Delete
    }

    fn build_query(&self, records: &[Record]) -> Result<BuiltQuery> {
        let schema = Schema::union(records);
        self.cache
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
        execute_rows(self, self.platform.as_ref(), &self.config, query, records, pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultMessages;
    use crate::platform::platform_for;

    #[test]
    fn test_delete_sql_composite_key() {
        let platform = platform_for("oracle", DefaultMessages::shared()).unwrap();
        let config = OutputConfig::new("oracle", "orders")
            .with_action(WriteMode::Delete)
            .with_keys(["region", "id"]);
        let m = DeleteQuery::new(platform, Arc::new(config));

        let records = vec![Record::builder()
            .with_long("id", 1)
            .with_string("region", "eu")
            .with_string("note", "x")
            .build()];
        let q = m.build_query(&records).unwrap();

        assert_eq!(
            q.sql(),
            r#"DELETE FROM "orders" WHERE "region" = :1 AND "id" = :2"#
        );
        assert_eq!(q.params()[0].entry.name, "region");
    }

    #[test]
    fn test_delete_without_keys_fails() {
        let platform = platform_for("postgres", DefaultMessages::shared()).unwrap();
        let m = DeleteQuery::new(platform, Arc::new(OutputConfig::new("postgres", "t")));
        let records = vec![Record::builder().with_long("id", 1).build()];
        assert!(m
            .build_query(&records)
            .unwrap_err()
            .to_string()
            .contains("no key for delete query"));
    }
}
