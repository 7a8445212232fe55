use std::sync::Arc;

use super::{unsupported, Platform};
use crate::config::{ConnectionSettings, DriverDescriptor};
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::messages::Messages;
use crate::record::FieldType;
use crate::security::{escape_string_literal, quote_identifier};
use crate::table::Column;

/// Snowflake platform. Delete and upsert use the staged bulk path.
#[derive(Clone)]
pub struct SnowflakePlatform {
    messages: Arc<dyn Messages>,
}

impl SnowflakePlatform {
    /// Create the platform
    pub fn new(messages: Arc<dyn Messages>) -> Self {
        Self { messages }
    }
}

impl Platform for SnowflakePlatform {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn messages(&self) -> &dyn Messages {
        self.messages.as_ref()
    }

    fn identifier(&self, name: &str) -> String {
        quote_identifier(name, '"', '"')
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".into()
    }

    /// `{protocol}://{account host}:{port}/?db={database}[&params]`
    fn build_url(&self, driver: &DriverDescriptor, settings: &ConnectionSettings) -> String {
        let port = settings.port.unwrap_or(driver.default_port);
        let mut url = format!(
            "{}://{}:{}/?db={}",
            driver.protocol, settings.host, port, settings.database
        );
        let params = settings.query_string();
        if !params.is_empty() {
            url.push('&');
            url.push_str(&params);
        }
        url
    }

    fn native_type(&self, column: &Column) -> Result<String> {
        Ok(match column.field_type {
            FieldType::String if column.is_bounded() => format!("VARCHAR({})", column.size),
            FieldType::String => "VARCHAR".into(),
            FieldType::Boolean => "BOOLEAN".into(),
            FieldType::Double | FieldType::Float => "FLOAT".into(),
            FieldType::Long => "BIGINT".into(),
            FieldType::Int => "INT".into(),
            FieldType::Bytes => "BINARY".into(),
            FieldType::DateTime => "TIMESTAMP_NTZ".into(),
            FieldType::Record | FieldType::Array => return Err(unsupported(self, column)),
        })
    }

    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>) {
        ("42710", Some(2002))
    }

    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String {
        let schema = schema
            .map(|s| format!("'{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "CURRENT_SCHEMA()".into());
        format!(
            "SELECT constraint_name AS \"constraint_name\", table_name AS \"table_name\" \
             FROM information_schema.table_constraints \
             WHERE constraint_type = 'PRIMARY KEY' AND table_schema = {schema}"
        )
    }

    fn add_data_source_properties(&self, config: &mut ConnectionConfig) {
        if let Some(app) = &config.application_name {
            config.properties.insert("application".into(), app.clone());
        }
        config
            .properties
            .insert("CLIENT_SESSION_KEEP_ALIVE".into(), "true".into());
    }
}
