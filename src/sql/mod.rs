//! Named-parameter SQL templates.
//!
//! - `named`: single-pass placeholder scanner and the parsed [`NamedSql`]
//! - `translator`: per-pool cache keyed by template text

pub mod named;
pub mod translator;

pub use named::{NamedSql, Slot, SqlDialect, StatementKind};
pub use translator::NamedSqlTranslator;
