//! Result rows decoded from the driver.

use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use std::sync::Arc;

/// One decoded result row. Column names are shared across a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve a column label to its index.
    ///
    /// Exact matches win; otherwise labels compare ASCII case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    /// Get a column value by label.
    pub fn get(&self, name: &str) -> DbResult<&SqlValue> {
        self.index_of(name)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| DbError::unknown_column(name))
    }

    /// Get a column value by position.
    pub fn get_index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Convert the row to a JSON object keyed by column label.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| {
                let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                (name.clone(), json)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let columns: Arc<[String]> = vec!["id".to_string(), "Name".to_string()].into();
        Record::new(columns, vec![SqlValue::Int(1), SqlValue::Null])
    }

    #[test]
    fn test_get_by_label() {
        let record = sample();
        assert_eq!(record.get("id").unwrap(), &SqlValue::Int(1));
        assert_eq!(record.get("name").unwrap(), &SqlValue::Null);
    }

    #[test]
    fn test_unknown_column_is_lookup_error() {
        let record = sample();
        assert!(matches!(
            record.get("mobile"),
            Err(DbError::Lookup { .. })
        ));
    }

    #[test]
    fn test_to_json_map() {
        let map = sample().to_json_map();
        assert_eq!(map["id"], serde_json::json!(1));
        assert!(map["Name"].is_null());
    }
}
