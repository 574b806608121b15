//! Data models shared by the translator, the pool and statements.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod record;
pub mod value;

// Re-export commonly used types
pub use connection::{DriverKind, PoolStatus, masked_connection_string};
pub use record::Record;
pub use value::{FromSqlValue, SqlValue};
