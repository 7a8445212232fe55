//! Target table description used for DDL generation

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{FieldType, Schema};

/// Size value meaning "no declared length"
pub const UNBOUNDED: i32 = -1;

/// A physical column of the target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Field name at the source
    pub original_field_name: String,
    /// Logical type
    pub field_type: FieldType,
    /// Declared length, [`UNBOUNDED`] when none
    pub size: i32,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

impl Column {
    /// Create a nullable, unbounded, non-key column
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            original_field_name: name.clone(),
            name,
            field_type,
            size: UNBOUNDED,
            nullable: true,
            primary_key: false,
        }
    }

    /// Set the source field name
    pub fn with_original_field_name(mut self, original: impl Into<String>) -> Self {
        self.original_field_name = original.into();
        self
    }

    /// Set declared length
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark as primary-key column
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Whether a length was declared
    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.size > 0
    }

    /// Name used for SQL identifiers
    pub fn column_name(&self, use_original: bool) -> &str {
        if use_original {
            &self.original_field_name
        } else {
            &self.name
        }
    }
}

/// Target table: optional schema, name, ordered columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    schema: Option<String>,
    name: String,
    columns: Vec<Column>,
}

impl Table {
    /// Create a table; the name must be non-empty and at least one column is required
    pub fn new(schema: Option<String>, name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::schema("table name cannot be empty"));
        }
        if columns.is_empty() {
            return Err(Error::schema(format!("table '{name}' needs at least one column")));
        }
        Ok(Self {
            schema: schema.filter(|s| !s.trim().is_empty()),
            name,
            columns,
        })
    }

    /// Derive the table from a batch schema. Key fields (matched by source name)
    /// become primary-key columns; STRING columns get `varchar_length`.
    pub fn from_schema(
        schema_name: Option<String>,
        name: impl Into<String>,
        record_schema: &Schema,
        keys: &[String],
        varchar_length: i32,
    ) -> Result<Self> {
        let columns = record_schema
            .entries()
            .iter()
            .map(|entry| {
                let is_key = keys.iter().any(|k| *k == entry.original_name);
                let mut column = Column::new(entry.name.clone(), entry.field_type)
                    .with_original_field_name(entry.original_name.clone())
                    .with_nullable(entry.nullable && !is_key);
                if entry.field_type == FieldType::String {
                    column = column.with_size(varchar_length);
                }
                if is_key {
                    column = column.primary_key();
                }
                column
            })
            .collect();
        Self::new(schema_name, name, columns)
    }

    /// Schema (namespace) name
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Primary-key columns in declaration order
    pub fn primary_keys(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SchemaEntry;

    #[test]
    fn test_table_invariants() {
        assert!(Table::new(None, "", vec![Column::new("id", FieldType::Long)]).is_err());
        assert!(Table::new(None, "users", vec![]).is_err());

        let table = Table::new(Some(" ".into()), "users", vec![Column::new("id", FieldType::Long)]).unwrap();
        assert_eq!(table.schema(), None);
        assert_eq!(table.name(), "users");
    }

    #[test]
    fn test_from_schema_marks_keys() {
        let schema = Schema::new(vec![
            SchemaEntry::new("id", FieldType::Long),
            SchemaEntry::new("name", FieldType::String),
            SchemaEntry::new("score", FieldType::Double).not_null(),
        ]);

        let table = Table::from_schema(None, "users", &schema, &["id".to_string()], 64).unwrap();
        let id = &table.columns()[0];
        assert!(id.primary_key);
        assert!(!id.nullable);
        assert_eq!(id.size, UNBOUNDED);

        let name = &table.columns()[1];
        assert!(!name.primary_key);
        assert!(name.nullable);
        assert_eq!(name.size, 64);

        assert!(!table.columns()[2].nullable);
        assert_eq!(table.primary_keys().count(), 1);
    }
}
