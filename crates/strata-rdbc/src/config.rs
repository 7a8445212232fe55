//! Output stage configuration
//!
//! Deserialized from the job definition (YAML/JSON), validated with
//! `validator`, and documented through `schemars` for UI generation.
//!
//! ```yaml
//! engine: snowflake
//! schema: PUBLIC
//! table: customers
//! action: upsert
//! keys: [id]
//! ignore_update: [created_at]
//! create_table_if_not_exists: true
//! rows_per_staging_file: 50000
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};

/// Write action applied to each batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert every record
    #[default]
    Insert,
    /// Update rows matched by key
    Update,
    /// Delete rows matched by key
    Delete,
    /// Insert or update depending on key match
    Upsert,
}

impl WriteMode {
    /// Whether the action targets rows through key columns
    pub const fn needs_keys(self) -> bool {
        !matches!(self, Self::Insert)
    }

    /// Lower-case action name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
        }
    }
}

/// What the output stage does with rejected records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// Return rejects to the caller for a reject branch
    #[default]
    Collect,
    /// Log each reject; the outcome still carries them
    Log,
    /// Fail the batch if anything was rejected
    Fail,
}

/// Output stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
#[validate(schema(function = "validate_keys"))]
pub struct OutputConfig {
    /// Engine key (postgres, mysql, mariadb, sqlserver, oracle, snowflake)
    #[validate(length(min = 1))]
    pub engine: String,

    /// Target schema name
    #[serde(default)]
    pub schema: Option<String>,

    /// Target table name
    #[validate(length(min = 1))]
    pub table: String,

    /// Write action
    #[serde(default)]
    pub action: WriteMode,

    /// Key columns, by source field name
    #[serde(default)]
    pub keys: Vec<String>,

    /// Columns never written by UPDATE, by source field name
    #[serde(default)]
    pub ignore_update: Vec<String>,

    /// Use source field names instead of sanitized names for columns
    #[serde(default)]
    pub use_original_column_name: bool,

    /// Create the target table before the first batch
    #[serde(default)]
    pub create_table_if_not_exists: bool,

    /// Declared length for STRING columns created by DDL (-1 = engine default)
    #[serde(default = "default_varchar_length")]
    #[validate(range(min = -1))]
    pub varchar_length: i32,

    /// Rows written to each staging file by the bulk path
    #[serde(default = "default_rows_per_staging_file")]
    #[validate(range(min = 1, max = 10_000_000))]
    pub rows_per_staging_file: usize,

    /// Handling of rejected records
    #[serde(default)]
    pub reject_policy: RejectPolicy,
}

fn default_varchar_length() -> i32 {
    -1
}

fn default_rows_per_staging_file() -> usize {
    100_000
}

fn validate_keys(config: &OutputConfig) -> std::result::Result<(), ValidationError> {
    if config.action.needs_keys() && config.keys.is_empty() {
        let mut err = ValidationError::new("keys_required");
        err.message = Some(format!("action '{}' requires at least one key", config.action.as_str()).into());
        return Err(err);
    }
    Ok(())
}

impl OutputConfig {
    /// Minimal configuration for an insert into `table`
    pub fn new(engine: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            schema: None,
            table: table.into(),
            action: WriteMode::default(),
            keys: Vec::new(),
            ignore_update: Vec::new(),
            use_original_column_name: false,
            create_table_if_not_exists: false,
            varchar_length: default_varchar_length(),
            rows_per_staging_file: default_rows_per_staging_file(),
            reject_policy: RejectPolicy::default(),
        }
    }

    /// Set the action
    pub fn with_action(mut self, action: WriteMode) -> Self {
        self.action = action;
        self
    }

    /// Set key columns
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set columns ignored by UPDATE
    pub fn with_ignore_update<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_update = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the target schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Create the table before writing
    pub fn with_create_table(mut self, create: bool) -> Self {
        self.create_table_if_not_exists = create;
        self
    }

    /// Use source field names as column names
    pub fn with_original_column_names(mut self, enabled: bool) -> Self {
        self.use_original_column_name = enabled;
        self
    }

    /// Set the reject policy
    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = policy;
        self
    }

    /// Set rows per staging file
    pub fn with_rows_per_staging_file(mut self, rows: usize) -> Self {
        self.rows_per_staging_file = rows;
        self
    }

    /// Run field and cross-field validation
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid output configuration: {e}")))
    }
}

/// Static description of a JDBC-style driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriverDescriptor {
    /// Engine key
    pub engine: String,
    /// URL protocol prefix (e.g. `postgresql`, `jdbc:oracle:thin`)
    pub protocol: String,
    /// Port used when the settings leave it out
    pub default_port: u16,
}

impl DriverDescriptor {
    /// Create a descriptor
    pub fn new(engine: impl Into<String>, protocol: impl Into<String>, default_port: u16) -> Self {
        Self {
            engine: engine.into(),
            protocol: protocol.into(),
            default_port,
        }
    }
}

/// Host/database parameters used to assemble a connection URL
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, JsonSchema)]
pub struct ConnectionSettings {
    /// Server host name
    #[validate(length(min = 1))]
    pub host: String,
    /// Server port; the driver default when absent
    #[serde(default)]
    pub port: Option<u16>,
    /// Database (or service) name
    #[serde(default)]
    pub database: String,
    /// Extra `key=value` pairs joined with `&`
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
}

impl ConnectionSettings {
    /// Create settings for a host and database
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            database: database.into(),
            parameters: Vec::new(),
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Append a URL parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// Parameters rendered as `k1=v1&k2=v2`
    pub fn query_string(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config: OutputConfig =
            serde_json::from_str(r#"{"engine":"postgres","table":"users"}"#).unwrap();

        assert_eq!(config.action, WriteMode::Insert);
        assert_eq!(config.varchar_length, -1);
        assert_eq!(config.rows_per_staging_file, 100_000);
        assert_eq!(config.reject_policy, RejectPolicy::Collect);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_keyed_action_requires_keys() {
        let config = OutputConfig::new("mysql", "users").with_action(WriteMode::Upsert);
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("requires at least one key"));

        let config = config.with_keys(["id"]);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_empty_table_rejected() {
        let config = OutputConfig::new("mysql", "");
        assert!(config.check().is_err());
    }

    #[test]
    fn test_query_string() {
        let settings = ConnectionSettings::new("db", "sales")
            .with_parameter("ssl", "true")
            .with_parameter("loginTimeout", "30");
        assert_eq!(settings.query_string(), "ssl=true&loginTimeout=30");
    }
}
