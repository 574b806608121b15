//! Statement execution against one driver connection.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific execution and OUT parameter handling
//! - `postgres`: PostgreSQL-specific execution and OUT parameter handling
//! - `sqlite`: SQLite-specific execution
//!
//! Each submodule streams with `fetch_many`, so one round trip yields both
//! result rows and affected-row counts.

use crate::db::connection::DbConnection;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::RecordBuilder;
use crate::error::{DbError, DbResult};
use crate::models::{Record, SqlValue};
use crate::sql::{NamedSql, StatementKind};
use futures_util::TryStreamExt;
use sqlx::Either;
use std::collections::HashMap;
use tracing::debug;

/// Everything one execution produced.
#[derive(Debug, Default)]
pub struct DriverOutcome {
    pub records: Vec<Record>,
    pub rows_affected: u64,
    pub generated_keys: Vec<i64>,
    /// OUT/INOUT values of a procedure call, by slot name.
    pub out_values: HashMap<String, SqlValue>,
}

/// Resolve bound values into slot order.
///
/// Every slot must have a value; OUT-only slots of a call are exempt when
/// `allow_unbound_out` is set.
pub(crate) fn resolve_params(
    sql: &NamedSql,
    values: &HashMap<String, SqlValue>,
    allow_unbound_out: bool,
) -> DbResult<Vec<Option<SqlValue>>> {
    sql.slots()
        .iter()
        .map(|slot| match values.get(&slot.name) {
            Some(v) => Ok(Some(v.clone())),
            None if allow_unbound_out && slot.is_out() => Ok(None),
            None => Err(DbError::unknown_parameter(&slot.name)),
        })
        .collect()
}

/// Execute `sql` with the values bound by name.
pub(crate) async fn execute(
    conn: &mut DbConnection,
    sql: &NamedSql,
    values: &HashMap<String, SqlValue>,
) -> DbResult<DriverOutcome> {
    if sql.is_call() {
        return execute_call(conn, sql, values).await;
    }

    let params: Vec<SqlValue> = resolve_params(sql, values, false)?
        .into_iter()
        .map(|v| v.unwrap_or(SqlValue::Null))
        .collect();
    debug!(
        sql = %sql.rewritten_sql(),
        params = params.len(),
        kind = ?sql.kind(),
        "Executing statement"
    );

    let rewritten = sql.rewritten_sql();
    impl_db_dispatch!(conn, {
        MySql(c) => mysql::run(c, rewritten, sql.kind(), &params).await,
        Postgres(c) => postgres::run(c, rewritten, sql.kind(), &params).await,
        SQLite(c) => sqlite::run(c, rewritten, sql.kind(), &params).await,
    })
}

async fn execute_call(
    conn: &mut DbConnection,
    sql: &NamedSql,
    values: &HashMap<String, SqlValue>,
) -> DbResult<DriverOutcome> {
    let params = resolve_params(sql, values, true)?;
    debug!(
        sql = %sql.rewritten_sql(),
        params = params.len(),
        out_params = sql.out_slots().count(),
        "Executing procedure call"
    );

    impl_db_dispatch!(conn, {
        MySql(c) => mysql::call(c, sql, &params).await,
        Postgres(c) => postgres::call(c, sql, &params).await,
        // No stored procedures; the driver reports the syntax error
        SQLite(c) => {
            let call_sql = sql.render_call(|_| None);
            let params: Vec<SqlValue> = params
                .into_iter()
                .map(|v| v.unwrap_or(SqlValue::Null))
                .collect();
            sqlite::run(c, &call_sql, StatementKind::Call, &params).await
        }
    })
}

/// Keys `first..first + count` reported by an auto-increment insert.
fn key_range(first: u64, count: u64) -> impl Iterator<Item = i64> {
    (0..count.max(1)).filter_map(move |offset| i64::try_from(first + offset).ok())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::Executor;
    use sqlx::mysql::MySqlConnection;

    #[allow(deprecated)]
    pub async fn run(
        conn: &mut MySqlConnection,
        sql: &str,
        kind: StatementKind,
        params: &[SqlValue],
    ) -> DbResult<DriverOutcome> {
        let mut outcome = DriverOutcome::default();
        let mut builder = RecordBuilder::default();

        // When params is empty, use raw SQL to avoid prepared statement issues
        // (some SQL like CREATE PROCEDURE doesn't support prepared statements)
        let mut stream = if params.is_empty() {
            conn.fetch_many(sql)
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), bind_mysql_param)
                .fetch_many(conn)
        };

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    outcome.rows_affected += done.rows_affected();
                    if kind == StatementKind::Insert && done.last_insert_id() > 0 {
                        outcome
                            .generated_keys
                            .extend(key_range(done.last_insert_id(), done.rows_affected()));
                    }
                }
                Either::Right(row) => outcome.records.push(builder.record(&row)),
            }
        }
        Ok(outcome)
    }

    /// OUT slots go through `@name` session variables; INOUT values are
    /// assigned first and everything is read back with one SELECT.
    pub async fn call(
        conn: &mut MySqlConnection,
        sql: &NamedSql,
        params: &[Option<SqlValue>],
    ) -> DbResult<DriverOutcome> {
        let mut inputs = Vec::new();
        for (slot, value) in sql.slots().iter().zip(params) {
            if slot.is_out() {
                let value = value.clone().unwrap_or(SqlValue::Null);
                let assign = format!("SET @{} = ?", slot.name);
                run(&mut *conn, &assign, StatementKind::Other, &[value]).await?;
            } else {
                inputs.push(value.clone().unwrap_or(SqlValue::Null));
            }
        }

        let call_sql = sql.render_call(|slot| slot.is_out().then(|| format!("@{}", slot.name)));
        let mut outcome = run(&mut *conn, &call_sql, StatementKind::Call, &inputs).await?;

        let out_names: Vec<&str> = sql.out_slots().map(|s| s.name.as_str()).collect();
        if !out_names.is_empty() {
            let select = format!(
                "SELECT {}",
                out_names
                    .iter()
                    .map(|n| format!("@{n}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let read = run(&mut *conn, &select, StatementKind::Query, &[]).await?;
            if let Some(row) = read.records.first() {
                for (idx, name) in out_names.iter().enumerate() {
                    let value = row.get_index(idx).cloned().unwrap_or(SqlValue::Null);
                    outcome.out_values.insert(name.to_string(), value);
                }
            }
        }
        Ok(outcome)
    }
}

mod postgres {
    use super::*;
    use sqlx::Executor;
    use sqlx::postgres::PgConnection;

    #[allow(deprecated)]
    pub async fn run(
        conn: &mut PgConnection,
        sql: &str,
        kind: StatementKind,
        params: &[SqlValue],
    ) -> DbResult<DriverOutcome> {
        let mut outcome = DriverOutcome::default();
        let mut builder = RecordBuilder::default();

        let mut stream = if params.is_empty() {
            conn.fetch_many(sql)
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), bind_postgres_param)
                .fetch_many(conn)
        };

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => outcome.rows_affected += done.rows_affected(),
                Either::Right(row) => outcome.records.push(builder.record(&row)),
            }
        }

        // No implicit key; INSERT ... RETURNING rows carry it in the first column
        if kind == StatementKind::Insert {
            outcome.generated_keys = outcome
                .records
                .iter()
                .filter_map(|r| match r.get_index(0) {
                    Some(SqlValue::Int(v)) => Some(*v),
                    _ => None,
                })
                .collect();
        }
        Ok(outcome)
    }

    /// OUT slots are passed as NULL; the procedure returns their values as
    /// a single row, in declaration order.
    pub async fn call(
        conn: &mut PgConnection,
        sql: &NamedSql,
        params: &[Option<SqlValue>],
    ) -> DbResult<DriverOutcome> {
        let mut inputs = Vec::new();
        let mut values = params.iter();
        let call_sql = sql.render_call(|slot| match values.next().cloned().flatten() {
            // INOUT keeps its marker and is bound like an input
            Some(v) => {
                inputs.push(v);
                None
            }
            None if slot.is_out() => Some("NULL".to_string()),
            None => {
                inputs.push(SqlValue::Null);
                None
            }
        });

        let mut outcome = run(&mut *conn, &call_sql, StatementKind::Call, &inputs).await?;
        if sql.out_slots().next().is_some() {
            if let Some(row) = outcome.records.first() {
                for (idx, slot) in sql.out_slots().enumerate() {
                    let value = row.get_index(idx).cloned().unwrap_or(SqlValue::Null);
                    outcome.out_values.insert(slot.name.clone(), value);
                }
            }
            outcome.records.clear();
        }
        Ok(outcome)
    }
}

mod sqlite {
    use super::*;
    use sqlx::Executor;
    use sqlx::sqlite::SqliteConnection;

    #[allow(deprecated)]
    pub async fn run(
        conn: &mut SqliteConnection,
        sql: &str,
        kind: StatementKind,
        params: &[SqlValue],
    ) -> DbResult<DriverOutcome> {
        let mut outcome = DriverOutcome::default();
        let mut builder = RecordBuilder::default();

        let mut stream = if params.is_empty() {
            conn.fetch_many(sql)
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), bind_sqlite_param)
                .fetch_many(conn)
        };

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    outcome.rows_affected += done.rows_affected();
                    // Rowids of one INSERT are assigned consecutively, ending at the last
                    if kind == StatementKind::Insert && done.rows_affected() > 0 {
                        let count = done.rows_affected();
                        let last = done.last_insert_rowid();
                        let first = u64::try_from(last).unwrap_or(0).saturating_sub(count - 1);
                        outcome.generated_keys.extend(key_range(first, count));
                    }
                }
                Either::Right(row) => outcome.records.push(builder.record(&row)),
            }
        }
        Ok(outcome)
    }
}
