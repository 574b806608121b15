//! Row decoding into [`SqlValue`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! A column that cannot be decoded is logged and read as NULL rather than
//! failing the whole result set.

use crate::models::{DriverKind, Record, SqlValue};
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Date,
    Time,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, driver: DriverKind) -> TypeCategory {
    let lower = type_name.to_ascii_lowercase();
    // "INT UNSIGNED", "DOUBLE PRECISION": the first word decides
    let base = lower.split_whitespace().next().unwrap_or("");

    if base.contains("decimal") || base.contains("numeric") {
        // SQLite's NUMERIC affinity is not an exact decimal
        if driver == DriverKind::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if base.ends_with("int")
        || base.ends_with("serial")
        || matches!(base, "int2" | "int4" | "int8" | "integer")
    {
        return TypeCategory::Integer;
    }

    match base {
        "bool" | "boolean" => TypeCategory::Boolean,
        "float" | "float4" | "float8" | "double" | "real" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "datetime" | "timestamp" | "timestamptz" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "timetz" => TypeCategory::Time,
        "bytea" => TypeCategory::Binary,
        "text" | "varchar" | "char" | "bpchar" | "name" | "citext" | "tinytext"
        | "mediumtext" | "longtext" | "enum" | "set" => TypeCategory::Text,
        _ if base.contains("blob") || base.contains("binary") => TypeCategory::Binary,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw MySQL DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_ascii_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row to Record
// =============================================================================

/// Trait for converting database rows to decoded values.
pub trait RowToValues {
    fn to_values(&self) -> Vec<SqlValue>;
}

impl RowToValues for MySqlRow {
    fn to_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DriverKind::MySql);
                mysql::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for PgRow {
    fn to_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DriverKind::Postgres);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn to_values(&self) -> Vec<SqlValue> {
        (0..self.columns().len())
            .map(|idx| sqlite::decode_column(self, idx))
            .collect()
    }
}

/// Builds records for one result, sharing the column list between rows.
#[derive(Debug, Default)]
pub(crate) struct RecordBuilder {
    columns: Option<Arc<[String]>>,
}

impl RecordBuilder {
    pub(crate) fn record<R: Row + RowToValues>(&mut self, row: &R) -> Record {
        let columns = self.columns_for(row);
        Record::new(columns, row.to_values())
    }

    fn columns_for<R: Row>(&mut self, row: &R) -> Arc<[String]> {
        let cols = row.columns();
        if let Some(existing) = &self.columns {
            if existing.len() == cols.len()
                && existing.iter().zip(cols).all(|(name, col)| name == col.name())
            {
                return Arc::clone(existing);
            }
        }
        let names: Arc<[String]> = cols.iter().map(|c| c.name().to_string()).collect();
        self.columns = Some(Arc::clone(&names));
        names
    }
}

fn decode_failed(idx: usize, category: TypeCategory, error: impl std::fmt::Display) -> SqlValue {
    warn!(column = idx, ?category, error = %error, "Failed to decode column, reading as NULL");
    SqlValue::Null
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return SqlValue::Null,
            Ok(_) => {}
            Err(e) => return decode_failed(idx, category, e),
        }
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .map(|v| SqlValue::Text(v.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).map(SqlValue::Bytes),
            TypeCategory::Timestamp => row
                .try_get::<chrono::NaiveDateTime, _>(idx)
                .map(SqlValue::Timestamp),
            TypeCategory::Date => row
                .try_get::<chrono::NaiveDate, _>(idx)
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Time => row
                .try_get::<chrono::NaiveTime, _>(idx)
                .map(|v| SqlValue::Text(v.to_string())),
            _ => decode_text(row, idx),
        };
        decoded.unwrap_or_else(|e| decode_failed(idx, category, e))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        // Try signed types
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Ok(SqlValue::Int(v));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        // Try unsigned types
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        let v = row.try_get::<u64, _>(idx)?;
        // BIGINT UNSIGNED above i64::MAX keeps its digits
        Ok(i64::try_from(v)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string())))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Ok(SqlValue::Float(v));
        }
        row.try_get::<f32, _>(idx).map(|v| SqlValue::Float(v.into()))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return Ok(SqlValue::Text(v));
        }
        // JSON and unknown types arrive as text on the wire
        row.try_get_unchecked::<String, _>(idx).map(SqlValue::Text)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return SqlValue::Null,
            Ok(_) => {}
            Err(e) => return decode_failed(idx, category, e),
        }
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<rust_decimal::Decimal, _>(idx)
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).map(SqlValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).map(SqlValue::Bytes),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => row
                .try_get::<chrono::NaiveDate, _>(idx)
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Time => row
                .try_get::<chrono::NaiveTime, _>(idx)
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            _ => row.try_get::<String, _>(idx).map(SqlValue::Text),
        };
        decoded.unwrap_or_else(|e| decode_failed(idx, category, e))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Ok(SqlValue::Int(v.into()));
        }
        row.try_get::<i64, _>(idx).map(SqlValue::Int)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Ok(SqlValue::Float(v));
        }
        row.try_get::<f32, _>(idx).map(|v| SqlValue::Float(v.into()))
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
            return Ok(SqlValue::Timestamp(v));
        }
        row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|v| SqlValue::Timestamp(v.naive_utc()))
    }

    fn decode_json(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        row.try_get::<serde_json::Value, _>(idx)
            .map(|v| SqlValue::Text(v.to_string()))
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
        row.try_get::<uuid::Uuid, _>(idx)
            .map(|v| SqlValue::Text(v.hyphenated().to_string()))
    }
}

mod sqlite {
    use super::*;

    /// SQLite values are decoded by storage class, not declared type.
    pub fn decode_column(row: &SqliteRow, idx: usize) -> SqlValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return SqlValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(e) => return decode_failed(idx, TypeCategory::Unknown, e),
        };
        let category = categorize_type(&storage, DriverKind::SQLite);
        let decoded = match category {
            TypeCategory::Integer => row.try_get_unchecked::<i64, _>(idx).map(SqlValue::Int),
            TypeCategory::Float => row.try_get_unchecked::<f64, _>(idx).map(SqlValue::Float),
            TypeCategory::Binary => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(SqlValue::Bytes),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(SqlValue::Text),
        };
        decoded.unwrap_or_else(|e| decode_failed(idx, category, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DriverKind::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", DriverKind::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT8", DriverKind::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DriverKind::SQLite),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGSERIAL", DriverKind::Postgres),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_interval_and_point_are_not_integers() {
        assert_eq!(
            categorize_type("INTERVAL", DriverKind::Postgres),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("POINT", DriverKind::Postgres),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DriverKind::MySql),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DriverKind::Postgres),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DriverKind::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DriverKind::MySql),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DriverKind::Postgres),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("DATE", DriverKind::MySql),
            TypeCategory::Date
        );
        assert_eq!(
            categorize_type("TIME", DriverKind::Postgres),
            TypeCategory::Time
        );
    }

    #[test]
    fn test_categorize_type_binary_and_text() {
        assert_eq!(
            categorize_type("VARBINARY", DriverKind::MySql),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("BLOB", DriverKind::SQLite),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("BYTEA", DriverKind::Postgres),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DriverKind::MySql),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("DOUBLE PRECISION", DriverKind::Postgres),
            TypeCategory::Float
        );
    }
}
