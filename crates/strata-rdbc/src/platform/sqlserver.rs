use std::sync::Arc;

use super::{unsupported, Platform};
use crate::config::{ConnectionSettings, DriverDescriptor};
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::messages::Messages;
use crate::record::FieldType;
use crate::security::{escape_string_literal, quote_identifier};
use crate::table::Column;

/// Longest VARCHAR usable in an index key
const KEY_VARCHAR_LENGTH: i32 = 900;

/// Microsoft SQL Server platform
#[derive(Clone)]
pub struct SqlServerPlatform {
    messages: Arc<dyn Messages>,
}

impl SqlServerPlatform {
    /// Create the platform
    pub fn new(messages: Arc<dyn Messages>) -> Self {
        Self { messages }
    }
}

impl Platform for SqlServerPlatform {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn messages(&self) -> &dyn Messages {
        self.messages.as_ref()
    }

    /// Bracket quoting. ANSI `"` quoting depends on the session's
    /// `QUOTED_IDENTIFIER` setting; brackets do not.
    fn identifier(&self, name: &str) -> String {
        quote_identifier(name, '[', ']')
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("@P{ordinal}")
    }

    /// `{protocol}://{host}:{port};databaseName={db}[;k=v;...]`
    fn build_url(&self, driver: &DriverDescriptor, settings: &ConnectionSettings) -> String {
        let port = settings.port.unwrap_or(driver.default_port);
        let mut url = format!(
            "{}://{}:{};databaseName={}",
            driver.protocol, settings.host, port, settings.database
        );
        let params = settings.query_string();
        if !params.is_empty() {
            url.push(';');
            url.push_str(&params.replace('&', ";"));
        }
        url
    }

    fn native_type(&self, column: &Column) -> Result<String> {
        Ok(match column.field_type {
            FieldType::String if column.is_bounded() => format!("VARCHAR({})", column.size),
            FieldType::String if column.primary_key => format!("VARCHAR({KEY_VARCHAR_LENGTH})"),
            FieldType::String => "VARCHAR(max)".into(),
            FieldType::Boolean => "BIT".into(),
            FieldType::Double | FieldType::Float => "DECIMAL".into(),
            FieldType::Long => "BIGINT".into(),
            FieldType::Int => "INT".into(),
            FieldType::Bytes => "VARBINARY(max)".into(),
            FieldType::DateTime => "datetime2".into(),
            FieldType::Record | FieldType::Array => return Err(unsupported(self, column)),
        })
    }

    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>) {
        ("S0001", Some(2714))
    }

    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String {
        let schema = schema
            .map(|s| format!("'{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "SCHEMA_NAME()".into());
        format!(
            "SELECT CONSTRAINT_NAME AS constraint_name, TABLE_NAME AS table_name \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS \
             WHERE CONSTRAINT_TYPE = 'PRIMARY KEY' AND TABLE_SCHEMA = {schema}"
        )
    }

    fn add_data_source_properties(&self, config: &mut ConnectionConfig) {
        if let Some(app) = &config.application_name {
            config.properties.insert("applicationName".into(), app.clone());
        }
    }
}
