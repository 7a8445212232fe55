//! Generic structured records
//!
//! A [`Record`] is an ordered set of named, typed, nullable fields described by
//! its own [`Schema`]. Records inside one batch may carry different field
//! subsets; the batch schema is the ordered union of all of them.
//!
//! Absence matters: a field that is missing from a record's schema is not the
//! same as a field that is present with a NULL value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Value;

/// Closed set of logical field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// Text
    String,
    /// Boolean
    Boolean,
    /// 64-bit float
    Double,
    /// 32-bit float
    Float,
    /// 64-bit integer
    Long,
    /// 32-bit integer
    Int,
    /// Raw bytes
    Bytes,
    /// Point in time
    DateTime,
    /// Nested record
    Record,
    /// Array of values
    Array,
}

impl FieldType {
    /// Upper-case logical type name
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Boolean => "BOOLEAN",
            Self::Double => "DOUBLE",
            Self::Float => "FLOAT",
            Self::Long => "LONG",
            Self::Int => "INT",
            Self::Bytes => "BYTES",
            Self::DateTime => "DATETIME",
            Self::Record => "RECORD",
            Self::Array => "ARRAY",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One field declaration in a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Sanitized field name
    pub name: String,
    /// Field name as it appeared at the source
    pub original_name: String,
    /// Logical type
    pub field_type: FieldType,
    /// Whether the field may be null
    pub nullable: bool,
}

impl SchemaEntry {
    /// Create a nullable entry whose original name equals its name
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            name,
            field_type,
            nullable: true,
        }
    }

    /// Set the source field name
    pub fn with_original_name(mut self, original: impl Into<String>) -> Self {
        self.original_name = original.into();
        self
    }

    /// Mark the entry as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Name used for SQL identifiers
    pub fn column_name(&self, use_original: bool) -> &str {
        if use_original {
            &self.original_name
        } else {
            &self.name
        }
    }
}

/// Ordered field declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

impl Schema {
    /// Create a schema from entries
    pub fn new(entries: Vec<SchemaEntry>) -> Self {
        Self { entries }
    }

    /// Ordered union of all records' entries; the first declaration of a name wins.
    pub fn union<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut entries: Vec<SchemaEntry> = Vec::new();
        for record in records {
            for entry in record.schema().entries() {
                if !entries.iter().any(|e| e.name == entry.name) {
                    entries.push(entry.clone());
                }
            }
        }
        Self { entries }
    }

    /// Field declarations in order
    #[inline]
    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    /// Look up an entry by name
    pub fn entry(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Look up an entry by its source field name
    pub fn entry_by_original(&self, original: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.original_name == original)
    }

    /// Cache key: field names joined with `::`
    pub fn fingerprint(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join("::")
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema has no entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A structured record; never mutated by this crate
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Schema,
    values: Vec<Value>,
}

impl Record {
    /// Start building a record
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// The record's own schema
    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Value of a field; `None` when the field is absent, `Some(Value::Null)` when present but null
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .entries
            .iter()
            .position(|e| e.name == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Value of a field looked up by its source name
    pub fn get_by_original(&self, original: &str) -> Option<&Value> {
        self.schema
            .entries
            .iter()
            .position(|e| e.original_name == original)
            .and_then(|idx| self.values.get(idx))
    }

    /// Whether the record declares a field with this name
    pub fn contains(&self, name: &str) -> bool {
        self.schema.entry(name).is_some()
    }

    /// Entries paired with their values
    pub fn fields(&self) -> impl Iterator<Item = (&SchemaEntry, &Value)> {
        self.schema.entries.iter().zip(self.values.iter())
    }
}

/// Fluent record builder
#[derive(Debug, Default)]
pub struct RecordBuilder {
    entries: Vec<SchemaEntry>,
    values: Vec<Value>,
}

impl RecordBuilder {
    /// Add a field; a later field with the same name replaces the earlier one
    pub fn field(mut self, entry: SchemaEntry, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.entries.iter().position(|e| e.name == entry.name) {
            Some(idx) => {
                self.entries[idx] = entry;
                self.values[idx] = value;
            }
            None => {
                self.entries.push(entry);
                self.values.push(value);
            }
        }
        self
    }

    /// Add a nullable STRING field
    pub fn with_string(self, name: &str, value: impl Into<String>) -> Self {
        self.field(SchemaEntry::new(name, FieldType::String), value.into())
    }

    /// Add a nullable LONG field
    pub fn with_long(self, name: &str, value: i64) -> Self {
        self.field(SchemaEntry::new(name, FieldType::Long), value)
    }

    /// Add a nullable INT field
    pub fn with_int(self, name: &str, value: i32) -> Self {
        self.field(SchemaEntry::new(name, FieldType::Int), value)
    }

    /// Add a nullable BOOLEAN field
    pub fn with_boolean(self, name: &str, value: bool) -> Self {
        self.field(SchemaEntry::new(name, FieldType::Boolean), value)
    }

    /// Add a nullable DOUBLE field
    pub fn with_double(self, name: &str, value: f64) -> Self {
        self.field(SchemaEntry::new(name, FieldType::Double), value)
    }

    /// Add a field that is present with a NULL value
    pub fn with_null(self, name: &str, field_type: FieldType) -> Self {
        self.field(SchemaEntry::new(name, field_type), Value::Null)
    }

    /// Finish the record
    pub fn build(self) -> Record {
        Record {
            schema: Schema {
                entries: self.entries,
            },
            values: self.values,
        }
    }
}
