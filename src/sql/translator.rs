//! Cached named-SQL translation.

use crate::error::DbResult;
use crate::sql::named::{NamedSql, SqlDialect};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Translates templates once per distinct text and hands out shared results.
///
/// Parse failures are not cached; translating the same bad template again
/// reports the same error.
#[derive(Debug)]
pub struct NamedSqlTranslator {
    dialect: SqlDialect,
    cache: RwLock<HashMap<String, Arc<NamedSql>>>,
}

impl NamedSqlTranslator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Translate `template`, returning the cached instance when present.
    pub fn translate(&self, template: &str) -> DbResult<Arc<NamedSql>> {
        if let Some(found) = self.cache.read().get(template) {
            return Ok(Arc::clone(found));
        }

        let parsed = Arc::new(NamedSql::parse(template, self.dialect)?);
        debug!(
            slots = parsed.marker_count(),
            kind = ?parsed.kind(),
            "Translated named SQL"
        );

        // Another thread may have won the race; keep whichever landed first.
        let mut cache = self.cache.write();
        let entry = cache
            .entry(template.to_string())
            .or_insert_with(|| Arc::clone(&parsed));
        Ok(Arc::clone(entry))
    }

    /// Number of cached templates.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_returns_cached_instance() {
        let translator = NamedSqlTranslator::new(SqlDialect::MySql);
        let sql = "SELECT * FROM `users` WHERE `id`=?id";
        let first = translator.translate(sql).unwrap();
        let second = translator.translate(sql).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(translator.cached_len(), 1);
    }

    #[test]
    fn test_distinct_texts_are_cached_separately() {
        let translator = NamedSqlTranslator::new(SqlDialect::SQLite);
        translator.translate("SELECT ?a").unwrap();
        translator.translate("SELECT ?a ").unwrap();
        assert_eq!(translator.cached_len(), 2);
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let translator = NamedSqlTranslator::new(SqlDialect::MySql);
        assert!(translator.translate("SELECT 'x").is_err());
        assert!(translator.translate("SELECT 'x").is_err());
        assert_eq!(translator.cached_len(), 0);
    }

    #[test]
    fn test_uncached_parse_matches_cached() {
        let translator = NamedSqlTranslator::new(SqlDialect::Postgres);
        let sql = "DELETE FROM users WHERE id=?id";
        let cached = translator.translate(sql).unwrap();
        let fresh = NamedSql::parse(sql, SqlDialect::Postgres).unwrap();
        assert_eq!(*cached, fresh);
    }
}
