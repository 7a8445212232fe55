use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    execute_rows, key_params_present, key_predicate, required_params_present, resolve_keys,
    target_table, BatchOutcome, BuiltQuery, QueryCache, QueryManager, QueryParam,
};
use crate::config::{OutputConfig, WriteMode};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::pool::ConnectionPool;
use crate::record::{Record, Schema, SchemaEntry};

/// `UPDATE t SET c = p, .. WHERE k = p AND ..`
pub struct UpdateQuery {
    platform: Arc<dyn Platform>,
    config: Arc<OutputConfig>,
    cache: QueryCache,
}

impl UpdateQuery {
    /// Create an update manager
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

    /// Entries written by SET: everything except keys and ignored columns,
    /// both matched by source field name.
    pub fn updatable_entries(&self, schema: &Schema) -> Vec<SchemaEntry> {
        schema
            .entries()
            .iter()
            .filter(|e| !self.config.keys.contains(&e.original_name))
            .filter(|e| !self.config.ignore_update.contains(&e.original_name))
            .cloned()
            .collect()
    }

    fn build(&self, schema: &Schema) -> Result<BuiltQuery> {
        let keys = resolve_keys(self.platform.as_ref(), &self.config, schema, "update")?;
        let updatable = self.updatable_entries(schema);
        if updatable.is_empty() {
            return Err(Error::schema(format!(
                "no updatable column for table {}",
                self.config.table
            )));
        }

        let use_original = self.config.use_original_column_name;
        let assignments: Vec<String> = updatable
            .iter()
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "{} = {}",
                    self.platform.identifier(e.column_name(use_original)),
                    self.platform.placeholder(i + 1)
                )
            })
            .collect();

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            target_table(self.platform.as_ref(), &self.config),
            assignments.join(", "),
            key_predicate(self.platform.as_ref(), &keys, updatable.len(), use_original)
        );
        debug!(table = %self.config.table, sql = %sql, "built update statement");

        let params = updatable
            .into_iter()
            .map(|entry| (entry, false))
            .chain(keys.into_iter().map(|entry| (entry, true)))
            .enumerate()
            .map(|(i, (entry, key))| QueryParam {
                ordinal: i + 1,
                entry,
                key,
            })
            .collect();
        Ok(BuiltQuery::new(schema.fingerprint(), sql, params))
    }
}

#[async_trait]
impl QueryManager for UpdateQuery {
    fn operation(&self) -> WriteMode {
        WriteMode::Update
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

    fn manager(config: OutputConfig) -> UpdateQuery {
        let platform = platform_for(&config.engine, DefaultMessages::shared()).unwrap();
        UpdateQuery::new(platform, Arc::new(config))
    }

    fn batch() -> Vec<Record> {
        vec![Record::builder()
            .with_long("id", 1)
            .with_string("name", "a")
            .with_string("created", "2024")
            .build()]
    }

    #[test]
    fn test_update_sql() {
        let m = manager(
            OutputConfig::new("postgres", "users")
                .with_action(WriteMode::Update)
                .with_keys(["id"])
                .with_ignore_update(["created"]),
        );
        let q = m.build_query(&batch()).unwrap();
        assert_eq!(q.sql(), r#"UPDATE "users" SET "name" = $1 WHERE "id" = $2"#);
        assert_eq!(q.key_params().count(), 1);
    }

    #[test]
    fn test_update_without_keys_fails() {
        let m = manager(OutputConfig::new("mysql", "users").with_action(WriteMode::Update));
        let err = m.build_query(&batch()).unwrap_err();
        assert!(matches!(err, Error::MissingKey { .. }));
        assert!(err.to_string().contains("no key for update query"));
    }

    #[test]
    fn test_update_unknown_key_fails() {
        let m = manager(
            OutputConfig::new("mysql", "users")
                .with_action(WriteMode::Update)
                .with_keys(["uuid"]),
        );
        let err = m.build_query(&batch()).unwrap_err();
        assert!(err.to_string().contains("no field for query param: uuid"));
    }

    #[test]
    fn test_update_requires_non_null_key() {
        let m = manager(
            OutputConfig::new("mysql", "users")
                .with_action(WriteMode::Update)
                .with_keys(["id"]),
        );
        let records = vec![Record::builder()
            .with_null("id", crate::record::FieldType::Long)
            .with_string("name", "a")
            .build()];
        let q = m.build_query(&records).unwrap();
        assert!(!m.validate_query_param(&q, &records[0]));
    }
}
