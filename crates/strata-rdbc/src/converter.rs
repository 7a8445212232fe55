//! Record field to bound-parameter conversion
//!
//! Dispatch is keyed by the column's logical type. The set of logical types is
//! closed, so the registry is a `match` rather than a map of callbacks.
//! A value that cannot be represented as the column's native type is a
//! statement-level [`Error::TypeConversion`], never a reject.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::record::{FieldType, Record, SchemaEntry};
use crate::types::Value;

/// Converter for one logical type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueConverter {
    field_type: FieldType,
}

impl ValueConverter {
    /// Converter for `field_type`
    pub const fn for_type(field_type: FieldType) -> Self {
        Self { field_type }
    }

    /// Logical type handled by this converter
    pub const fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Read `entry` from `record` and convert it to the native parameter value.
    /// Absent and null fields bind as NULL.
    pub fn convert(&self, record: &Record, entry: &SchemaEntry) -> Result<Value> {
        match record.get(&entry.name) {
            None | Some(Value::Null) => Ok(Value::Null),
            Some(value) => self.coerce(value, &entry.name),
        }
    }

    /// Convert an already extracted value
    pub fn coerce(&self, value: &Value, field: &str) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let fail = || {
            Error::type_conversion(format!(
                "field '{}': cannot bind {} value as {}",
                field,
                value.sql_type(),
                self.field_type
            ))
        };

        Ok(match self.field_type {
            FieldType::String => Value::String(value.as_string().ok_or_else(fail)?),
            FieldType::Boolean => Value::Bool(value.as_bool().ok_or_else(fail)?),
            FieldType::Double => Value::Float64(value.as_f64().ok_or_else(fail)?),
            FieldType::Float => Value::Float32(value.as_f64().ok_or_else(fail)? as f32),
            FieldType::Long => Value::Int64(value.as_i64().ok_or_else(fail)?),
            FieldType::Int => {
                let wide = value.as_i64().ok_or_else(fail)?;
                Value::Int32(i32::try_from(wide).map_err(|_| fail())?)
            }
            FieldType::Bytes => Value::Bytes(value.as_bytes().ok_or_else(fail)?.to_vec()),
            FieldType::DateTime => Value::DateTimeTz(to_datetime(value).ok_or_else(fail)?),
            FieldType::Record | FieldType::Array => match value {
                Value::Json(json) => Value::String(json.to_string()),
                other => Value::String(other.as_string().ok_or_else(fail)?),
            },
        })
    }
}

/// Timestamps arrive as native values, RFC 3339 text, or epoch milliseconds.
fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTimeTz(dt) => Some(*dt),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Int64(millis) => Utc.timestamp_millis_opt(*millis).single(),
        Value::Int32(millis) => Utc.timestamp_millis_opt(i64::from(*millis)).single(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, field_type: FieldType) -> SchemaEntry {
        SchemaEntry::new(name, field_type)
    }

    #[test]
    fn test_absent_and_null_bind_null() {
        let record = Record::builder().with_null("name", FieldType::String).build();
        let conv = ValueConverter::for_type(FieldType::String);

        assert_eq!(conv.convert(&record, &entry("name", FieldType::String)).unwrap(), Value::Null);
        assert_eq!(conv.convert(&record, &entry("other", FieldType::String)).unwrap(), Value::Null);
    }

    #[test]
    fn test_int_overflow_is_conversion_error() {
        let record = Record::builder().with_long("n", i64::MAX).build();
        let err = ValueConverter::for_type(FieldType::Int)
            .convert(&record, &entry("n", FieldType::Int))
            .unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));
    }

    #[test]
    fn test_out_of_range_float_is_conversion_error() {
        let long = ValueConverter::for_type(FieldType::Long);
        assert!(matches!(
            long.coerce(&Value::Float64(1e30), "n").unwrap_err(),
            Error::TypeConversion { .. }
        ));
        assert!(long.coerce(&Value::Float64(f64::INFINITY), "n").is_err());
        assert_eq!(long.coerce(&Value::Float64(42.0), "n").unwrap(), Value::Int64(42));

        let int = ValueConverter::for_type(FieldType::Int);
        assert!(int.coerce(&Value::Float64(1e30), "n").is_err());
        assert!(int.coerce(&Value::Float64(3e9), "n").is_err());
    }

    #[test]
    fn test_datetime_sources() {
        let conv = ValueConverter::for_type(FieldType::DateTime);
        let parsed = conv
            .coerce(&Value::String("2024-03-01T10:00:00+02:00".into()), "ts")
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(parsed, Value::DateTimeTz(expected));

        let millis = conv.coerce(&Value::Int64(0), "ts").unwrap();
        assert_eq!(millis, Value::DateTimeTz(Utc.timestamp_millis_opt(0).unwrap()));

        assert!(conv.coerce(&Value::Bool(true), "ts").is_err());
    }

    #[test]
    fn test_structured_values_bind_as_json_text() {
        let conv = ValueConverter::for_type(FieldType::Record);
        let bound = conv
            .coerce(&Value::Json(serde_json::json!({"city": "Oslo"})), "address")
            .unwrap();
        assert_eq!(bound, Value::String(r#"{"city":"Oslo"}"#.into()));
    }

    #[test]
    fn test_boolean_rejects_garbage() {
        let conv = ValueConverter::for_type(FieldType::Boolean);
        assert_eq!(conv.coerce(&Value::String("yes".into()), "b").unwrap(), Value::Bool(true));
        assert!(conv.coerce(&Value::String("maybe".into()), "b").is_err());
    }
}
