//! # strata-rdbc
//!
//! Dialect-aware relational output for the Strata data pipeline.
//!
//! Batches of structured [`Record`](record::Record)s are written into a
//! relational table with one of four actions (insert, update, delete, upsert).
//! Every record of a batch ends up either accepted or rejected with a reason;
//! statement-level failures roll back and surface as [`Error`].
//!
//! ## Features
//!
//! - **Platforms**: PostgreSQL, MySQL/MariaDB, SQL Server, Oracle, Snowflake
//!   (identifier quoting, placeholders, URL shape, DDL type mapping)
//! - **Table creation**: `CREATE TABLE` from the batch schema with a primary-key
//!   clause that checks the catalog first; "already exists" races are tolerated
//! - **Query managers**: statements cached per field set, per-record validation
//!   and rejects, transactional execution when the pool does not auto-commit
//! - **Bulk path**: Snowflake delete/upsert through CSV staging, `COPY INTO` and
//!   a set-based `DELETE ... USING` / `MERGE`, with guaranteed cleanup
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_rdbc::prelude::*;
//!
//! let config = OutputConfig::new("mysql", "customers")
//!     .with_action(WriteMode::Upsert)
//!     .with_keys(["id"]);
//! let output = RecordOutput::new(config, pool)?;
//!
//! let records = vec![
//!     Record::builder().with_long("id", 1).with_string("name", "Ada").build(),
//! ];
//! let outcome = output.write_batch(&records).await?;
//! assert_eq!(outcome.accepted.len() + outcome.rejected.len(), records.len());
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend via tokio-postgres
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod converter;
pub mod error;
pub mod messages;
pub mod output;
pub mod platform;
pub mod pool;
pub mod query;
pub mod record;
pub mod security;
pub mod staging;
pub mod table;
pub mod testing;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Records and values
    pub use crate::record::{FieldType, Record, RecordBuilder, Schema, SchemaEntry};
    pub use crate::types::{Row, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, PreparedStatement, Transaction,
    };

    // Pool types
    pub use crate::pool::{ConnectionPool, PoolConfig, PooledConnection, SimpleConnectionPool};

    // Configuration
    pub use crate::config::{
        ConnectionSettings, DriverDescriptor, OutputConfig, RejectPolicy, WriteMode,
    };

    // Platforms and DDL
    pub use crate::messages::{DefaultMessages, Messages};
    pub use crate::platform::{
        platform_for, MySqlPlatform, OraclePlatform, Platform, PostgresPlatform,
        SnowflakePlatform, SqlServerPlatform,
    };
    pub use crate::table::{Column, Table};

    // Writing
    pub use crate::converter::ValueConverter;
    pub use crate::output::{AtomicOutputStats, OutputStats, RecordOutput};
    pub use crate::query::{
        query_manager_for, BatchOutcome, BuiltQuery, DeleteQuery, InsertQuery, QueryManager,
        Reject, SnowflakeDelete, SnowflakeUpsert, UpdateQuery, UpsertQuery,
    };
    pub use crate::staging::{SqlPutUploader, StageUploader};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use record::Record;
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("postgres://localhost/test");
        let _output = OutputConfig::new("postgres", "users");
        let _mode = WriteMode::Upsert;
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_platform_selection() {
        let messages = DefaultMessages::shared();
        assert_eq!(platform_for("postgres", messages.clone()).unwrap().name(), "postgres");
        assert_eq!(platform_for("oracle", messages.clone()).unwrap().name(), "oracle");
        assert_eq!(platform_for("snowflake", messages).unwrap().name(), "snowflake");
    }

    #[test]
    fn test_write_modes() {
        assert_eq!(WriteMode::default(), WriteMode::Insert);
        assert!(WriteMode::Delete.needs_keys());
    }
}
