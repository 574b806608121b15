//! Bound parameter values and typed column access.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A single SQL value, either bound to a parameter or read from a column.
///
/// Serializes as plain JSON for output only. The untagged form cannot be
/// read back unambiguously (text, bytes and timestamps are all strings), so
/// parameters from text go through [`SqlValue::parse_literal`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Interpret a command-line literal: `null`, booleans, integers and
    /// floats are recognized, anything else is text.
    pub fn parse_literal(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Text(raw.to_string())
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for SqlValue {
                fn from(v: $t) -> Self {
                    Self::Int(v as i64)
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Conversion from a non-NULL column value into a Rust type.
///
/// Returning `None` means the stored value cannot be represented as `Self`.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Option<Self>;
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(*v as i64),
            // DECIMAL columns arrive as text
            SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }
}

macro_rules! impl_from_sql_int {
    ($($t:ty),+) => {
        $(
            impl FromSqlValue for $t {
                fn from_sql_value(value: &SqlValue) -> Option<Self> {
                    i64::from_sql_value(value).and_then(|v| <$t>::try_from(v).ok())
                }
            }
        )+
    };
}

impl_from_sql_int!(i32, i16, u32, u64);

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Float(v) => Some(*v),
            SqlValue::Int(v) => Some(*v as f64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromSqlValue for f32 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        f64::from_sql_value(value).map(|v| v as f32)
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bool(v) => Some(*v),
            // TINYINT(1) and SQLite booleans are integers on the wire
            SqlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::Timestamp(v) => Some(v.to_string()),
            SqlValue::Bytes(v) => String::from_utf8(v.clone()).ok(),
            SqlValue::Null => None,
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bytes(v) => Some(v.clone()),
            SqlValue::Text(v) => Some(v.clone().into_bytes()),
            _ => None,
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Timestamp(v) => Some(*v),
            // SQLite stores timestamps as text
            SqlValue::Text(v) => NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rust_types() {
        assert_eq!(SqlValue::from(7), SqlValue::Int(7));
        assert_eq!(SqlValue::from(7u32), SqlValue::Int(7));
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(2.5)), SqlValue::Float(2.5));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(SqlValue::parse_literal("NULL"), SqlValue::Null);
        assert_eq!(SqlValue::parse_literal("true"), SqlValue::Bool(true));
        assert_eq!(SqlValue::parse_literal("42"), SqlValue::Int(42));
        assert_eq!(SqlValue::parse_literal("4.5"), SqlValue::Float(4.5));
        assert_eq!(
            SqlValue::parse_literal("13883833982a"),
            SqlValue::Text("13883833982a".to_string())
        );
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(i64::from_sql_value(&SqlValue::Int(3)), Some(3));
        assert_eq!(i32::from_sql_value(&SqlValue::Int(3)), Some(3));
        assert_eq!(i32::from_sql_value(&SqlValue::Int(i64::MAX)), None);
        assert_eq!(u64::from_sql_value(&SqlValue::Int(-1)), None);
        assert_eq!(i64::from_sql_value(&SqlValue::Text("10".into())), Some(10));
        assert_eq!(i64::from_sql_value(&SqlValue::Bytes(vec![1])), None);
    }

    #[test]
    fn test_bool_from_integer() {
        assert_eq!(bool::from_sql_value(&SqlValue::Int(1)), Some(true));
        assert_eq!(bool::from_sql_value(&SqlValue::Int(0)), Some(false));
        assert_eq!(bool::from_sql_value(&SqlValue::Text("1".into())), None);
    }

    #[test]
    fn test_timestamp_from_text() {
        let parsed = NaiveDateTime::from_sql_value(&SqlValue::Text("2023-08-15 10:30:00".into()));
        assert!(parsed.is_some());
    }

    #[test]
    fn test_serialize_untagged() {
        let values = vec![
            SqlValue::Null,
            SqlValue::Int(1),
            SqlValue::Text("a".into()),
            SqlValue::Bytes(b"hi".to_vec()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,1,"a","aGk="]"#);
    }

    #[test]
    fn test_text_bytes_and_timestamp_all_serialize_as_strings() {
        let at = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S").unwrap();
        let json = serde_json::to_value(vec![
            SqlValue::Text("aGk=".into()),
            SqlValue::Bytes(b"hi".to_vec()),
            SqlValue::Timestamp(at),
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!(["aGk=", "aGk=", "2024-01-02T03:04:05"]));
    }
}
