//! Per-engine SQL platform
//!
//! A [`Platform`] knows everything that differs between database engines for
//! the output path:
//! - identifier quoting and bound-parameter markers
//! - connection URL shape and driver properties
//! - logical type to DDL type mapping
//! - the (SQLSTATE, vendor code) fingerprint of "table already exists"
//!
//! Platforms are selected once, by engine key, through [`platform_for`] and are
//! shared read-only afterwards.

mod mysql;
mod oracle;
mod postgres;
mod snowflake;
mod sqlserver;

pub use mysql::MySqlPlatform;
pub use oracle::OraclePlatform;
pub use postgres::PostgresPlatform;
pub use snowflake::SnowflakePlatform;
pub use sqlserver::SqlServerPlatform;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConnectionSettings, DriverDescriptor};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Error, Result};
use crate::messages::Messages;
use crate::table::{Column, Table};
use crate::types::Row;

/// Engine-specific SQL knowledge
#[async_trait]
pub trait Platform: Send + Sync {
    /// Engine key
    fn name(&self) -> &'static str;

    /// Message provider used for user-facing errors
    fn messages(&self) -> &dyn Messages;

    /// Quote an identifier (table, column, constraint name)
    fn identifier(&self, name: &str) -> String;

    /// Bound-parameter marker for the 1-based `ordinal`
    fn placeholder(&self, ordinal: usize) -> String;

    /// Native column type for a logical column type
    fn native_type(&self, column: &Column) -> Result<String>;

    /// (SQLSTATE, vendor code) reported when CREATE TABLE hits an existing table.
    /// A `None` code matches any vendor code.
    fn table_exists_fingerprint(&self) -> (&'static str, Option<i32>);

    /// Catalog query listing PRIMARY KEY constraints of a schema as
    /// (`constraint_name`, `table_name`) rows
    fn primary_key_constraints_sql(&self, schema: Option<&str>) -> String;

    /// Set engine-specific driver properties on the pooled data source
    fn add_data_source_properties(&self, config: &mut ConnectionConfig);

    /// Connection URL: `{protocol}://{host}:{port}/{database}[?params]`
    fn build_url(&self, driver: &DriverDescriptor, settings: &ConnectionSettings) -> String {
        let port = settings.port.unwrap_or(driver.default_port);
        let params = settings.query_string();
        let mut url = format!(
            "{}://{}:{}/{}",
            driver.protocol, settings.host, port, settings.database
        );
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params);
        }
        url
    }

    /// Whether the column is declared NOT NULL
    fn is_required(&self, column: &Column) -> bool {
        !column.nullable || column.primary_key
    }

    /// `[schema.]name` with both parts quoted
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.identifier(schema), self.identifier(name)),
            None => self.identifier(name),
        }
    }

    /// Whether `error` is this engine's "table already exists" failure
    fn is_table_already_exists_error(&self, error: &Error) -> bool {
        let (state, code) = self.table_exists_fingerprint();
        error.sql_state() == Some(state) && code.map_or(true, |c| error.vendor_code() == Some(c))
    }

    /// `CREATE TABLE [schema.]name (col type [NOT NULL], ..., <primary-key clause>)`
    async fn build_create_table_query(
        &self,
        connection: &dyn Connection,
        table: &Table,
        use_original_column_name: bool,
    ) -> Result<String> {
        let columns = table
            .columns()
            .iter()
            .map(|column| self.column_definition(column, use_original_column_name))
            .collect::<Result<Vec<_>>>()?;
        let primary_key = self
            .primary_key_clause(connection, table, use_original_column_name)
            .await?;

        Ok(format!(
            "CREATE TABLE {} ({}{})",
            self.qualified_name(table.schema(), table.name()),
            columns.join(", "),
            primary_key
        ))
    }

    /// Create the table; returns `false` when it already existed
    async fn create_table_if_absent(
        &self,
        connection: &dyn Connection,
        table: &Table,
        use_original_column_name: bool,
    ) -> Result<bool> {
        let sql = self
            .build_create_table_query(connection, table, use_original_column_name)
            .await?;
        debug!(engine = self.name(), sql = %sql, "create table");

        let outcome = if connection.is_auto_commit() {
            connection.execute(&sql, &[]).await.map(|_| ())
        } else {
            // DDL is transactional on some engines
            let tx = connection.begin().await?;
            match tx.execute(&sql, &[]).await {
                Ok(_) => tx.commit().await,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(engine = self.name(), table = table.name(), error = %rollback, "rollback failed");
                    }
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(()) => {
                info!(engine = self.name(), table = table.name(), "table created");
                Ok(true)
            }
            Err(e) if self.is_table_already_exists_error(&e) => {
                warn!(engine = self.name(), table = table.name(), "table already exists, continuing");
                Ok(false)
            }
            Err(e) => Err(e.with_sql(sql)),
        }
    }

    /// `name TYPE[ NOT NULL]`
    fn column_definition(&self, column: &Column, use_original_column_name: bool) -> Result<String> {
        let native = self.native_type(column)?;
        let mut definition = format!(
            "{} {}",
            self.identifier(column.column_name(use_original_column_name)),
            native
        );
        if self.is_required(column) {
            definition.push_str(" NOT NULL");
        }
        Ok(definition)
    }

    /// `, CONSTRAINT pk_x PRIMARY KEY (k1, k2)`, or empty when the table has no keys
    /// or the catalog shows it already owns a primary key.
    async fn primary_key_clause(
        &self,
        connection: &dyn Connection,
        table: &Table,
        use_original_column_name: bool,
    ) -> Result<String> {
        let keys: Vec<String> = table
            .primary_keys()
            .map(|c| self.identifier(c.column_name(use_original_column_name)))
            .collect();
        if keys.is_empty() {
            return Ok(String::new());
        }

        let existing = connection
            .query(&self.primary_key_constraints_sql(table.schema()), &[])
            .await?;
        if existing
            .iter()
            .any(|row| row_text(row, "table_name").is_some_and(|t| t.eq_ignore_ascii_case(table.name())))
        {
            debug!(table = table.name(), "primary key already declared, skipping clause");
            return Ok(String::new());
        }

        let base = format!("pk_{}", table.name());
        let taken = existing
            .iter()
            .any(|row| row_text(row, "constraint_name").is_some_and(|c| c.eq_ignore_ascii_case(&base)));
        let constraint = if taken {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}_{}", base, &suffix[..6])
        } else {
            base
        };

        Ok(format!(
            ", CONSTRAINT {} PRIMARY KEY ({})",
            self.identifier(&constraint),
            keys.join(", ")
        ))
    }
}

/// Error for RECORD/ARRAY columns, shared by every engine.
pub(crate) fn unsupported(platform: &dyn Platform, column: &Column) -> Error {
    Error::unsupported_type(
        platform.name(),
        column.original_field_name.clone(),
        platform
            .messages()
            .unsupported_type(platform.name(), column.field_type, &column.original_field_name),
    )
}

fn row_text(row: &Row, column: &str) -> Option<String> {
    row.get_by_name(column).and_then(|v| v.as_string())
}

/// Select a platform by engine key
pub fn platform_for(engine: &str, messages: Arc<dyn Messages>) -> Result<Arc<dyn Platform>> {
    let platform: Arc<dyn Platform> = match engine.to_lowercase().as_str() {
        "postgres" | "postgresql" => Arc::new(PostgresPlatform::new(messages)),
        "mysql" | "mariadb" => Arc::new(MySqlPlatform::new(messages)),
        "sqlserver" | "mssql" => Arc::new(SqlServerPlatform::new(messages)),
        "oracle" => Arc::new(OraclePlatform::new(messages)),
        "snowflake" => Arc::new(SnowflakePlatform::new(messages)),
        other => return Err(Error::config(messages.unknown_engine(other))),
    };
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultMessages;

    #[test]
    fn test_platform_for() {
        let m = DefaultMessages::shared();
        assert_eq!(platform_for("PostgreSQL", m.clone()).unwrap().name(), "postgres");
        assert_eq!(platform_for("mariadb", m.clone()).unwrap().name(), "mysql");
        assert_eq!(platform_for("mssql", m.clone()).unwrap().name(), "sqlserver");
        assert_eq!(platform_for("snowflake", m.clone()).unwrap().name(), "snowflake");
        assert!(platform_for("derby", m).is_err());
    }

    #[test]
    fn test_default_url() {
        let platform = PostgresPlatform::new(DefaultMessages::shared());
        let driver = DriverDescriptor::new("postgres", "postgresql", 5432);
        let settings = ConnectionSettings::new("db.local", "sales").with_parameter("sslmode", "require");

        assert_eq!(
            platform.build_url(&driver, &settings),
            "postgresql://db.local:5432/sales?sslmode=require"
        );
    }

    #[test]
    fn test_fingerprint_matching() {
        let platform = PostgresPlatform::new(DefaultMessages::shared());
        assert!(platform.is_table_already_exists_error(&Error::database("exists", Some("42P07".into()), None)));
        assert!(!platform.is_table_already_exists_error(&Error::database("syntax", Some("42601".into()), None)));
        assert!(!platform.is_table_already_exists_error(&Error::query("exists")));
    }
}
