//! Database layer.
//!
//! This module provides:
//! - Physical connections over sqlx and the pool that manages them
//! - Parameter binding and row decoding per driver
//! - Statement execution, batching and transaction grouping
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod statement;
pub mod transaction;
pub mod types;

pub use connection::{DbConnection, PooledConnection};
pub use executor::DriverOutcome;
pub use pool::ConnectionPool;
pub use statement::{EXECUTE_FAILED, Statement, StatementState};
