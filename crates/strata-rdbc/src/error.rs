//! Error types for strata-rdbc
//!
//! Statement-level failures travel through [`Error`]; row-level problems are
//! recovered into [`crate::query::Reject`] values and never surface here.
//!
//! - Retriable errors (connection, timeout, pool exhaustion)
//! - Fatal errors (unsupported types, bind failures, set-based statement failures)

use std::fmt;
use thiserror::Error;

/// Result type for strata-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Timeout errors (retriable)
    Timeout,
    /// Configuration error
    Configuration,
    /// Pool exhausted (retriable with backoff)
    PoolExhausted,
    /// Schema-related errors, including unsupported DDL types
    Schema,
    /// Staging / bulk-load errors
    Staging,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::PoolExhausted)
    }
}

/// Main error type for strata-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement failed before reaching the server, or the driver gave no details
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Server-side failure carrying the SQLSTATE and vendor error code
    #[error("database error [{}/{}]: {message}", .sql_state.as_deref().unwrap_or("-"), display_code(.vendor_code))]
    Database {
        message: String,
        sql_state: Option<String>,
        vendor_code: Option<i32>,
        sql: Option<String>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record value could not be bound to the column's native parameter type
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// The logical type has no physical column type on this engine
    #[error("{message}")]
    UnsupportedType {
        engine: String,
        field: String,
        message: String,
    },

    /// The operation needs key columns and none were configured
    #[error("{message}")]
    MissingKey { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Connection pool exhausted
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Schema error (table model invalid, field missing for a query param)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Local staging file handling failed
    #[error("staging error: {message}")]
    Staging {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } | Self::Database { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } | Self::MissingKey { .. } => ErrorCategory::Configuration,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Schema { .. } | Self::UnsupportedType { .. } => ErrorCategory::Schema,
            Self::Staging { .. } => ErrorCategory::Staging,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// SQLSTATE reported by the server, if any
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Vendor-specific error code reported by the server, if any
    pub fn vendor_code(&self) -> Option<i32> {
        match self {
            Self::Database { vendor_code, .. } => *vendor_code,
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a server-side error with its (SQLSTATE, vendor code) fingerprint
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        vendor_code: Option<i32>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            vendor_code,
            sql: None,
        }
    }

    /// Attach the failing SQL text to a query or database error
    pub fn with_sql(self, text: impl Into<String>) -> Self {
        match self {
            Self::Database {
                message,
                sql_state,
                vendor_code,
                ..
            } => Self::Database {
                message,
                sql_state,
                vendor_code,
                sql: Some(text.into()),
            },
            Self::Query {
                message, source, ..
            } => Self::Query {
                message,
                sql: Some(text.into()),
                source,
            },
            other => other,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create an unsupported-type error for a column on an engine
    pub fn unsupported_type(
        engine: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::UnsupportedType {
            engine: engine.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a missing-key error
    pub fn missing_key(message: impl Into<String>) -> Self {
        Self::MissingKey {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a staging error from an I/O failure
    pub fn staging(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Staging {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "-".to_string(), |c| c.to_string())
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Schema => write!(f, "schema"),
            Self::Staging => write!(f, "staging"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());
        assert!(ErrorCategory::PoolExhausted.is_retriable());

        assert!(!ErrorCategory::TypeConversion.is_retriable());
        assert!(!ErrorCategory::Query.is_retriable());
        assert!(!ErrorCategory::Schema.is_retriable());
    }

    #[test]
    fn test_database_error_fingerprint() {
        let err = Error::database("relation exists", Some("42P07".into()), None);
        assert_eq!(err.sql_state(), Some("42P07"));
        assert_eq!(err.vendor_code(), None);
        assert_eq!(err.category(), ErrorCategory::Query);

        let err = Error::database("There is already an object", Some("S0001".into()), Some(2714));
        assert!(err.to_string().contains("S0001/2714"));
    }

    #[test]
    fn test_with_sql_keeps_fingerprint() {
        let err = Error::database("boom", Some("42000".into()), Some(955)).with_sql("CREATE TABLE t");
        match err {
            Error::Database {
                sql, vendor_code, ..
            } => {
                assert_eq!(sql.as_deref(), Some("CREATE TABLE t"));
                assert_eq!(vendor_code, Some(955));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_type_is_schema() {
        let err = Error::unsupported_type("oracle", "flag", "unsupported boolean");
        assert_eq!(err.category(), ErrorCategory::Schema);
        assert_eq!(err.to_string(), "unsupported boolean");
    }
}
