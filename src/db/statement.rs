//! Named-parameter statements.
//!
//! A [`Statement`] binds values by name, executes once or as a batch, and
//! exposes the result rows, affected-row counts and generated keys of its
//! last execution. Statements are created from a [`ConnectionPool`]:
//!
//! ```ignore
//! let mut stmt = pool.statement("SELECT * FROM `users` WHERE `mobile`=?mobile").await?;
//! stmt.bind("mobile", "13883833982");
//! stmt.execute().await?;
//! while stmt.next_record()? {
//!     let name: String = stmt.value("name", String::new())?;
//! }
//! stmt.close().await?;
//! ```
//!
//! Close statements explicitly. Dropping an unclosed statement releases its
//! connection on a background task and rolls back any transaction it took
//! part in.

use crate::db::executor::{self, DriverOutcome};
use crate::db::pool::ConnectionPool;
use crate::db::transaction::{Session, SharedSession, finish_scope, generate_transaction_id};
use crate::error::{DbError, DbResult};
use crate::models::{FromSqlValue, Record, SqlValue};
use crate::sql::NamedSql;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Batch entry count recorded for a parameter set that failed.
pub const EXECUTE_FAILED: i64 = -3;

/// Observable lifecycle of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Created,
    Bound,
    /// Executed with results available.
    Executed,
    /// The result cursor has been exhausted.
    Consumed,
    Closed,
}

#[derive(Debug)]
pub struct Statement {
    pool: ConnectionPool,
    sql: Arc<NamedSql>,
    session: Arc<SharedSession>,
    owner: bool,
    transaction_id: Option<String>,
    values: HashMap<String, SqlValue>,
    batch: Vec<HashMap<String, SqlValue>>,
    records: Vec<Record>,
    cursor: Option<usize>,
    has_result_set: bool,
    out_values: HashMap<String, SqlValue>,
    keys: Vec<i64>,
    key_cursor: Option<usize>,
    updated_count: i64,
    batch_results: Vec<i64>,
    state: StatementState,
    last_error: Option<DbError>,
}

impl Statement {
    /// Translate `sql`, check out a connection and, for `transaction`,
    /// start a transaction on it.
    pub(crate) async fn open(pool: &ConnectionPool, sql: &str, transaction: bool) -> DbResult<Self> {
        let named = pool.translate(sql)?;
        let mut conn = pool.acquire().await?;

        let transaction_id = if transaction {
            let id = generate_transaction_id();
            if let Err(e) = conn.conn_mut().begin().await {
                conn.mark_broken();
                pool.release(conn).await;
                return Err(DbError::transaction(
                    format!("Failed to begin transaction: {e}"),
                    id,
                ));
            }
            debug!(transaction_id = %id, connection_id = conn.id(), "Transaction started");
            Some(id)
        } else {
            None
        };

        let session = Session::new(conn, transaction_id.clone()).shared();
        Ok(Self::with_session(pool, named, session, transaction, transaction_id))
    }

    /// Join `other`'s connection, and its transaction if one is open.
    pub(crate) async fn link(pool: &ConnectionPool, sql: &str, other: &Statement) -> DbResult<Self> {
        if !pool.same_pool(&other.pool) {
            return Err(DbError::configuration(
                "Linked statements must come from the same connection pool",
            ));
        }
        let named = pool.translate(sql)?;

        let transaction_id = {
            let mut session = other.session.state.lock().await;
            if session.connection.is_none() {
                return Err(DbError::configuration(
                    "Cannot link to a statement whose connection has been released",
                ));
            }
            session.open += 1;
            session.transaction.clone()
        };

        Ok(Self::with_session(
            pool,
            named,
            Arc::clone(&other.session),
            false,
            transaction_id,
        ))
    }

    fn with_session(
        pool: &ConnectionPool,
        sql: Arc<NamedSql>,
        session: Arc<SharedSession>,
        owner: bool,
        transaction_id: Option<String>,
    ) -> Self {
        Self {
            pool: pool.clone(),
            sql,
            session,
            owner,
            transaction_id,
            values: HashMap::new(),
            batch: Vec::new(),
            records: Vec::new(),
            cursor: None,
            has_result_set: false,
            out_values: HashMap::new(),
            keys: Vec::new(),
            key_cursor: None,
            updated_count: -1,
            batch_results: Vec::new(),
            state: StatementState::Created,
            last_error: None,
        }
    }

    pub fn sql(&self) -> &NamedSql {
        &self.sql
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    /// True when this statement started the transaction it runs in.
    pub fn is_transaction_owner(&self) -> bool {
        self.owner
    }

    /// Id of the transaction this statement joined at creation.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Bind `value` to every slot named `name`, replacing any earlier value.
    ///
    /// Names the template does not use are accepted and ignored.
    pub fn bind(&mut self, name: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self.state = StatementState::Bound;
        self
    }

    /// Bind several values at once.
    pub fn bind_all<I, K, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        self.values
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.state = StatementState::Bound;
        self
    }

    /// Queue the current bindings as one batch entry and start a new set.
    pub fn enqueue_batch(&mut self) -> &mut Self {
        self.batch.push(std::mem::take(&mut self.values));
        self.state = StatementState::Bound;
        self
    }

    /// Number of queued batch entries.
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    fn reset_results(&mut self) {
        self.records.clear();
        self.cursor = None;
        self.has_result_set = false;
        self.out_values.clear();
        self.keys.clear();
        self.key_cursor = None;
        self.updated_count = -1;
        self.batch_results.clear();
        self.last_error = None;
    }

    fn absorb(&mut self, outcome: DriverOutcome) {
        let kind = self.sql.kind();
        self.has_result_set = kind.yields_rows() || !outcome.records.is_empty();
        self.updated_count = if kind.yields_rows() && outcome.rows_affected == 0 {
            -1
        } else {
            i64::try_from(outcome.rows_affected).unwrap_or(i64::MAX)
        };
        self.records = outcome.records;
        self.keys = outcome.generated_keys;
        self.out_values = outcome.out_values;
    }

    /// Execute the queued batch, or the current bindings when nothing is queued.
    ///
    /// A single execution returns `Ok(true)` or the error; the statement is
    /// then back in the bound state and can be retried. A batch runs every
    /// entry and returns `Ok(false)` when any of them failed; failed entries
    /// are recorded as [`EXECUTE_FAILED`] and the last failure is kept in
    /// [`last_error`](Self::last_error). Any failure inside a transaction
    /// marks it for rollback.
    pub async fn execute(&mut self) -> DbResult<bool> {
        self.reset_results();
        let session = Arc::clone(&self.session);
        let mut guard = session.state.lock().await;
        let Some(conn) = guard.connection.as_mut() else {
            return Err(DbError::configuration(
                "Statement's connection has already been released",
            ));
        };

        if self.batch.is_empty() {
            return match executor::execute(conn.conn_mut(), &self.sql, &self.values).await {
                Ok(outcome) => {
                    self.absorb(outcome);
                    self.state = StatementState::Executed;
                    Ok(true)
                }
                Err(e) => {
                    if e.poisons_connection() {
                        conn.mark_broken();
                    }
                    session.mark_failed();
                    self.state = StatementState::Bound;
                    Err(e)
                }
            };
        }

        let sets = std::mem::take(&mut self.batch);
        let mut total: u64 = 0;
        let mut all_ok = true;
        for (index, set) in sets.iter().enumerate() {
            if conn.is_broken() {
                self.batch_results.push(EXECUTE_FAILED);
                continue;
            }
            match executor::execute(conn.conn_mut(), &self.sql, set).await {
                Ok(outcome) => {
                    total += outcome.rows_affected;
                    self.batch_results
                        .push(i64::try_from(outcome.rows_affected).unwrap_or(i64::MAX));
                    self.keys.extend(outcome.generated_keys);
                }
                Err(e) => {
                    warn!(batch_index = index, error = %e, "Batch entry failed");
                    if e.poisons_connection() {
                        conn.mark_broken();
                    }
                    self.batch_results.push(EXECUTE_FAILED);
                    self.last_error = Some(e);
                    all_ok = false;
                }
            }
        }
        if !all_ok {
            session.mark_failed();
        }
        debug!(
            entries = sets.len(),
            rows_affected = total,
            ok = all_ok,
            "Batch executed"
        );
        self.updated_count = i64::try_from(total).unwrap_or(i64::MAX);
        self.state = StatementState::Executed;
        Ok(all_ok)
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn next_record(&mut self) -> DbResult<bool> {
        if !self.has_result_set {
            return Err(DbError::invalid_input(
                "No result set: execute a query before reading rows",
            ));
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.records.len() {
            self.cursor = Some(next);
            Ok(true)
        } else {
            self.cursor = Some(self.records.len());
            self.state = StatementState::Consumed;
            Ok(false)
        }
    }

    /// The row under the cursor.
    pub fn record(&self) -> Option<&Record> {
        self.cursor.and_then(|c| self.records.get(c))
    }

    /// All rows of the last execution.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Column names of the last result set; empty when it had no rows.
    pub fn column_names(&self) -> &[String] {
        self.records.first().map(Record::columns).unwrap_or(&[])
    }

    /// Read `name` from an OUT parameter or the current row.
    ///
    /// NULL reads as `default`. A value that does not convert to `T` is a
    /// conversion error, an unknown column a lookup error.
    pub fn value<T: FromSqlValue>(&self, name: &str, default: T) -> DbResult<T> {
        let raw = match self.out_values.get(name) {
            Some(v) => v,
            None => self
                .record()
                .ok_or_else(|| {
                    DbError::invalid_input("No current row: call next_record before reading values")
                })?
                .get(name)?,
        };
        if raw.is_null() {
            return Ok(default);
        }
        T::from_sql_value(raw)
            .ok_or_else(|| DbError::conversion(name, raw.type_name(), std::any::type_name::<T>()))
    }

    /// Generated key under the key cursor, or the first key before the
    /// cursor has moved. Zero when there is none.
    pub fn auto_id(&self) -> i64 {
        match self.key_cursor {
            Some(i) => self.keys.get(i).copied().unwrap_or(0),
            None => self.keys.first().copied().unwrap_or(0),
        }
    }

    /// Step to the next generated key. Returns `false` once exhausted.
    pub fn next_auto_id(&mut self) -> bool {
        let next = self.key_cursor.map_or(0, |c| c + 1);
        if next < self.keys.len() {
            self.key_cursor = Some(next);
            true
        } else {
            self.key_cursor = Some(self.keys.len());
            false
        }
    }

    /// All generated keys of the last execution.
    pub fn generated_keys(&self) -> &[i64] {
        &self.keys
    }

    /// Affected rows of the last execution, summed over a batch.
    /// `-1` when it only produced a result set.
    pub fn updated_count(&self) -> i64 {
        self.updated_count
    }

    /// Per-entry affected rows of the last batch.
    pub fn updated_batch_results(&self) -> &[i64] {
        &self.batch_results
    }

    /// The last failed batch entry's error.
    pub fn last_error(&self) -> Option<&DbError> {
        self.last_error.as_ref()
    }

    /// Mark the enclosing transaction for rollback.
    pub async fn fail(&self) {
        self.session.mark_failed();
    }

    /// End this statement's scope.
    ///
    /// A transaction owner commits here, or rolls back if any member failed.
    /// The connection returns to the pool once no linked statement still
    /// uses it.
    pub async fn close(mut self) -> DbResult<()> {
        self.state = StatementState::Closed;
        finish_scope(&self.pool, &self.session, self.owner).await
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if self.state == StatementState::Closed {
            return;
        }

        // Raised before the owner can close, whatever the task scheduling
        self.session.mark_failed();

        let pool = self.pool.clone();
        let session = Arc::clone(&self.session);
        let owner = self.owner;
        let template = self.sql.template().to_string();

        // Spawn a task to handle async release - this is for panic safety
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = finish_scope(&pool, &session, owner).await {
                        warn!(error = %e, "Release of dropped statement failed");
                    }
                    warn!(
                        sql = %template,
                        "Statement released via Drop - consider using explicit close()"
                    );
                });
            }
            Err(_) => {
                warn!(
                    sql = %template,
                    "Statement dropped outside a tokio runtime; connection closed without release"
                );
            }
        }
    }
}
