//! User-facing message text
//!
//! Every string shown to an operator (reject reasons, unsupported-type errors,
//! configuration errors) comes from a [`Messages`] implementation so the text
//! can be swapped, e.g. for a localized bundle, without touching the logic.

use std::sync::Arc;

use crate::record::FieldType;

/// Provider of user-facing messages
pub trait Messages: Send + Sync {
    /// Column type that the engine cannot store
    fn unsupported_type(&self, engine: &str, field_type: FieldType, field: &str) -> String;

    /// BOOLEAN column on an engine without a boolean type
    fn unsupported_boolean(&self, engine: &str, field: &str) -> String;

    /// Reject reason for a record lacking a required parameter
    fn missing_query_param(&self) -> String;

    /// Key-based operation configured without keys
    fn no_key_for_query(&self, operation: &str) -> String;

    /// A configured key has no matching field in the batch
    fn no_field_for_query_param(&self, param: &str) -> String;

    /// No platform is registered for the engine key
    fn unknown_engine(&self, engine: &str) -> String;
}

/// English messages
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessages;

impl DefaultMessages {
    /// Shared handle to the default provider
    pub fn shared() -> Arc<dyn Messages> {
        Arc::new(Self)
    }
}

impl Messages for DefaultMessages {
    fn unsupported_type(&self, engine: &str, field_type: FieldType, field: &str) -> String {
        format!("unsupported type {field_type} for field '{field}' on database '{engine}'")
    }

    fn unsupported_boolean(&self, engine: &str, field: &str) -> String {
        format!("database '{engine}' has no boolean type, cannot create column for field '{field}'")
    }

    fn missing_query_param(&self) -> String {
        "missing required query param in this record".to_string()
    }

    fn no_key_for_query(&self, operation: &str) -> String {
        format!("no key for {operation} query")
    }

    fn no_field_for_query_param(&self, param: &str) -> String {
        format!("no field for query param: {param}")
    }

    fn unknown_engine(&self, engine: &str) -> String {
        format!("no platform available for database '{engine}'")
    }
}
