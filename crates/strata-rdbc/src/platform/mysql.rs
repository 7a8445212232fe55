use std::sync::Arc;

use super::{unsupported, Platform};
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::messages::Messages;
use crate::record::FieldType;
use crate::security::{escape_string_literal, quote_identifier};
use crate::table::Column;

/// Length used for unbounded STRING key columns; TEXT cannot be indexed whole.
const KEY_VARCHAR_LENGTH: i32 = 255;

/// MySQL / MariaDB platform
#[derive(Clone)]
pub struct MySqlPlatform {
    messages: Arc<dyn Messages>,
}

impl MySqlPlatform {
    /// Create the platform
    pub fn new(messages: Arc<dyn Messages>) -> Self {
        Self { messages }
    }
}

impl Platform for MySqlPlatform {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn messages(&self) -> &dyn Messages {
        self.messages.as_ref()
    }

    fn identifier(&self, name: &str) -> String {
        quote_identifier(name, '`', '`')
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".into()
    }

    fn native_type(&self, column: &Column) -> Result<String> {
        Ok(match column.field_type {
            FieldType::String if column.is_bounded() => format!("VARCHAR({})", column.size),
            FieldType::String if column.primary_key => format!("VARCHAR({KEY_VARCHAR_LENGTH})"),
            FieldType::String => "TEXT".into(),
            FieldType::Boolean => "BOOLEAN".into(),
            FieldType::Double => "DOUBLE".into(),
            FieldType::Float => "FLOAT".into(),
            FieldType::Long => "BIGINT".into(),
            FieldType::Int => "INT".into(),
            FieldType::Bytes => "BLOB".into(),
            FieldType::DateTime => "DATETIME(6)".into(),
            FieldType::Record | FieldType::Array => return Err(unsupported(self, column)),
        })
    }

    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>) {
        // ER_TABLE_EXISTS_ERROR
        ("42S01", Some(1050))
    }

    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String {
        let schema = schema
            .map(|s| format!("'{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "DATABASE()".into());
        format!(
            "SELECT constraint_name AS constraint_name, table_name AS table_name \
             FROM information_schema.table_constraints \
             WHERE constraint_type = 'PRIMARY KEY' AND table_schema = {schema}"
        )
    }

    fn add_data_source_properties(&self, config: &mut ConnectionConfig) {
        config
            .properties
            .insert("rewriteBatchedStatements".into(), "true".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultMessages;

    #[test]
    fn test_string_key_gets_bounded_type() {
        let p = MySqlPlatform::new(DefaultMessages::shared());
        let key = Column::new("code", FieldType::String).primary_key();
        assert_eq!(p.native_type(&key).unwrap(), "VARCHAR(255)");
        assert_eq!(p.native_type(&Column::new("note", FieldType::String)).unwrap(), "TEXT");
    }

    #[test]
    fn test_backtick_quoting() {
        let p = MySqlPlatform::new(DefaultMessages::shared());
        assert_eq!(p.identifier("order"), "`order`");
        assert_eq!(p.placeholder(3), "?");
    }
}
