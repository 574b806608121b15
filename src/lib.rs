//! Named SQL Library
//!
//! Named-parameter SQL (`?name`) translated to driver-native positional
//! markers and executed through a pool of sqlx connections (MySQL,
//! PostgreSQL, SQLite), with batching, generated keys, stored-procedure OUT
//! parameters and linked-statement transactions.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sql;

pub use config::{Config, PoolConfig};
pub use db::{ConnectionPool, Statement, StatementState};
pub use error::{DbError, DbResult};
pub use models::{DriverKind, FromSqlValue, Record, SqlValue};
pub use sql::{NamedSql, NamedSqlTranslator, SqlDialect};
