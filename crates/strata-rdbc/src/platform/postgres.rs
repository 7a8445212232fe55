use std::sync::Arc;

use super::{unsupported, Platform};
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::messages::Messages;
use crate::record::FieldType;
use crate::security::{escape_string_literal, quote_identifier};
use crate::table::Column;

/// PostgreSQL platform
#[derive(Clone)]
pub struct PostgresPlatform {
    messages: Arc<dyn Messages>,
}

impl PostgresPlatform {
    /// Create the platform
    pub fn new(messages: Arc<dyn Messages>) -> Self {
        Self { messages }
    }
}

impl Platform for PostgresPlatform {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn messages(&self) -> &dyn Messages {
        self.messages.as_ref()
    }

    fn identifier(&self, name: &str) -> String {
        quote_identifier(name, '"', '"')
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("${ordinal}")
    }

    fn native_type(&self, column: &Column) -> Result<String> {
        Ok(match column.field_type {
            FieldType::String if column.is_bounded() => format!("VARCHAR({})", column.size),
            FieldType::String => "TEXT".into(),
            FieldType::Boolean => "BOOLEAN".into(),
            FieldType::Double => "DOUBLE PRECISION".into(),
            FieldType::Float => "REAL".into(),
            FieldType::Long => "BIGINT".into(),
            FieldType::Int => "INTEGER".into(),
            FieldType::Bytes => "BYTEA".into(),
            FieldType::DateTime => "TIMESTAMP".into(),
            FieldType::Record | FieldType::Array => return Err(unsupported(self, column)),
        })
    }

    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>) {
        // duplicate_table
        ("42P07", None)
    }

    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String {
        let schema = schema
            .map(|s| format!("'{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "current_schema()".into());
        format!(
            "SELECT constraint_name, table_name FROM information_schema.table_constraints \
             WHERE constraint_type = 'PRIMARY KEY' AND table_schema = {schema}"
        )
    }

    fn add_data_source_properties(&self, config: &mut ConnectionConfig) {
        if let Some(app) = &config.application_name {
            config.properties.insert("application_name".into(), app.clone());
        }
    }
}
