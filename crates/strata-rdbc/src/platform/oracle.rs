use std::sync::Arc;

use super::{unsupported, Platform};
use crate::config::{ConnectionSettings, DriverDescriptor};
use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};
use crate::messages::Messages;
use crate::record::FieldType;
use crate::security::{escape_string_literal, quote_identifier};
use crate::table::Column;

/// Oracle's VARCHAR2 limit with standard string sizes
const MAX_VARCHAR_LENGTH: i32 = 4000;

/// Oracle platform. Oracle has no BOOLEAN column type.
#[derive(Clone)]
pub struct OraclePlatform {
    messages: Arc<dyn Messages>,
}

impl OraclePlatform {
    /// Create the platform
    pub fn new(messages: Arc<dyn Messages>) -> Self {
        Self { messages }
    }
}

impl Platform for OraclePlatform {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn messages(&self) -> &dyn Messages {
        self.messages.as_ref()
    }

    fn identifier(&self, name: &str) -> String {
        quote_identifier(name, '"', '"')
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!(":{ordinal}")
    }

    /// `{protocol}:@{host}:{port}:{sid}[?params]`
    fn build_url(&self, driver: &DriverDescriptor, settings: &ConnectionSettings) -> String {
        let port = settings.port.unwrap_or(driver.default_port);
        let mut url = format!(
            "{}:@{}:{}:{}",
            driver.protocol, settings.host, port, settings.database
        );
        let params = settings.query_string();
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params);
        }
        url
    }

    /// Schema names stay unquoted so they resolve case-insensitively.
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", schema, self.identifier(name)),
            None => self.identifier(name),
        }
    }

    fn native_type(&self, column: &Column) -> Result<String> {
        Ok(match column.field_type {
            FieldType::String if column.is_bounded() => format!("VARCHAR({})", column.size),
            FieldType::String => format!("VARCHAR({MAX_VARCHAR_LENGTH})"),
            FieldType::Boolean => {
                return Err(Error::unsupported_type(
                    self.name(),
                    column.original_field_name.clone(),
                    self.messages
                        .unsupported_boolean(self.name(), &column.original_field_name),
                ))
            }
            FieldType::Double | FieldType::Float | FieldType::Long | FieldType::Int => {
                "NUMBER".into()
            }
            FieldType::Bytes => "BLOB".into(),
            FieldType::DateTime => "TIMESTAMP(6)".into(),
            FieldType::Record | FieldType::Array => return Err(unsupported(self, column)),
        })
    }

    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>) {
        // ORA-00955: name is already used by an existing object
        ("42000", Some(955))
    }

    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String {
        match schema {
            Some(owner) => format!(
                "SELECT constraint_name, table_name FROM all_constraints \
                 WHERE constraint_type = 'P' AND owner = '{}'",
                escape_string_literal(&owner.to_uppercase())
            ),
            None => "SELECT constraint_name, table_name FROM user_constraints WHERE constraint_type = 'P'"
                .into(),
        }
    }

    fn add_data_source_properties(&self, config: &mut ConnectionConfig) {
        config
            .properties
            .insert("oracle.jdbc.J2EE13Compliant".into(), "TRUE".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultMessages;
    use crate::table::Table;

    #[test]
    fn test_boolean_is_rejected() {
        let p = OraclePlatform::new(DefaultMessages::shared());
        let err = p
            .native_type(&Column::new("active", FieldType::Boolean))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { ref field, .. } if field == "active"));
    }

    #[test]
    fn test_url_shape() {
        let p = OraclePlatform::new(DefaultMessages::shared());
        let driver = DriverDescriptor::new("oracle", "jdbc:oracle:thin", 1521);
        let settings = ConnectionSettings::new("ora.local", "ORCL");
        assert_eq!(p.build_url(&driver, &settings), "jdbc:oracle:thin:@ora.local:1521:ORCL");
    }

    #[test]
    fn test_schema_left_unquoted() {
        let p = OraclePlatform::new(DefaultMessages::shared());
        let table = Table::new(Some("sales".into()), "orders", vec![Column::new("id", FieldType::Long)]).unwrap();
        assert_eq!(p.qualified_name(table.schema(), table.name()), "sales.\"orders\"");
    }
}
