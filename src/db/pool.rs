//! Connection pool management.
//!
//! The pool keeps a bounded idle set of physical connections. Capacity is
//! advisory on the acquire path: when the idle set is empty every caller
//! opens its own connection, and `release` trims the idle set back down to
//! capacity by closing whatever does not fit.

use crate::config::PoolConfig;
use crate::db::connection::{DbConnection, PooledConnection};
use crate::db::statement::Statement;
use crate::error::{DbError, DbResult};
use crate::models::{DriverKind, PoolStatus, masked_connection_string};
use crate::sql::{NamedSql, NamedSqlTranslator};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to one connection pool. Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    config: PoolConfig,
    translator: NamedSqlTranslator,
    idle: Mutex<VecDeque<PooledConnection>>,
    checked_out: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Configure a pool. No connection is opened until one is needed.
    pub fn initialize(config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        info!(
            driver = %config.driver,
            url = %masked_connection_string(&config.url),
            capacity = config.capacity,
            "Connection pool initialized"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                translator: NamedSqlTranslator::new(config.driver.into()),
                idle: Mutex::new(VecDeque::with_capacity(config.capacity as usize)),
                checked_out: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// True from `initialize` until `shutdown`.
    pub fn is_initialized(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> DriverKind {
        self.inner.config.driver
    }

    /// Translate a template through this pool's cache.
    pub fn translate(&self, template: &str) -> DbResult<Arc<NamedSql>> {
        self.inner.translator.translate(template)
    }

    pub fn translator(&self) -> &NamedSqlTranslator {
        &self.inner.translator
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.idle.lock().len(),
            checked_out: self.inner.checked_out.load(Ordering::Acquire),
            capacity: self.capacity(),
        }
    }

    pub(crate) fn same_pool(&self, other: &ConnectionPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn capacity(&self) -> usize {
        self.inner.config.capacity as usize
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DbError::configuration("Connection pool has been shut down"))
        }
    }

    /// Create a statement in autocommit mode.
    pub async fn statement(&self, sql: &str) -> DbResult<Statement> {
        Statement::open(self, sql, false).await
    }

    /// Create a statement that owns a new transaction.
    pub async fn transaction(&self, sql: &str) -> DbResult<Statement> {
        Statement::open(self, sql, true).await
    }

    /// Create a statement sharing `other`'s connection and transaction.
    pub async fn linked(&self, sql: &str, other: &Statement) -> DbResult<Statement> {
        Statement::link(self, sql, other).await
    }

    async fn open_connection(&self) -> DbResult<PooledConnection> {
        let conn = DbConnection::open(&self.inner.config).await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, driver = %conn.driver(), "Opened new connection");
        Ok(PooledConnection::new(conn, id))
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        self.inner.idle.lock().pop_front()
    }

    /// Park `conn` if there is room, else hand it back.
    fn push_idle(&self, conn: PooledConnection) -> Option<PooledConnection> {
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.capacity() {
            idle.push_back(conn);
            None
        } else {
            Some(conn)
        }
    }

    /// Check out a live connection.
    ///
    /// Idle connections that fail the liveness probe are closed and the next
    /// one is tried. With nothing idle a new connection is opened; transient
    /// open failures are retried after the configured backoff.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        loop {
            self.ensure_open()?;
            let Some(mut conn) = self.pop_idle() else {
                break;
            };
            if conn.is_valid(self.inner.config.probe_timeout).await {
                self.inner.checked_out.fetch_add(1, Ordering::AcqRel);
                debug!(connection_id = conn.id(), "Reusing idle connection");
                return Ok(conn);
            }
            warn!(
                connection_id = conn.id(),
                age = ?conn.age(),
                "Discarding idle connection that failed liveness probe"
            );
            conn.close().await;
        }

        loop {
            self.ensure_open()?;
            match self.open_connection().await {
                Ok(conn) => {
                    self.inner.checked_out.fetch_add(1, Ordering::AcqRel);
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        error = %e,
                        backoff = ?self.inner.config.retry_backoff,
                        "Failed to open connection, retrying"
                    );
                    tokio::time::sleep(self.inner.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Return a checked-out connection.
    ///
    /// Broken connections, connections returned after shutdown and those
    /// that do not fit in the idle set are closed.
    pub async fn release(&self, conn: PooledConnection) {
        let _ = self
            .inner
            .checked_out
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if conn.is_broken() {
            warn!(
                connection_id = conn.id(),
                age = ?conn.age(),
                "Discarding broken connection"
            );
            conn.close().await;
            return;
        }
        if !self.is_initialized() {
            debug!(
                connection_id = conn.id(),
                "Pool shut down, closing returned connection"
            );
            conn.close().await;
            return;
        }
        if let Some(overflow) = self.push_idle(conn) {
            debug!(
                connection_id = overflow.id(),
                capacity = self.capacity(),
                "Idle set full, closing returned connection"
            );
            overflow.close().await;
        }
    }

    /// Block until the database accepts a validated connection.
    ///
    /// Every currently idle connection is probed once; failures are closed.
    /// If none survive, a fresh connection is opened and validated, sleeping
    /// the retry backoff between failed attempts, and the first one that
    /// validates is parked in the idle set.
    pub async fn wait_until_healthy(&self) -> DbResult<()> {
        self.ensure_open()?;
        let config = &self.inner.config;

        let mut healthy = 0;
        let pending = self.inner.idle.lock().len();
        for _ in 0..pending {
            let Some(mut conn) = self.pop_idle() else {
                break;
            };
            if conn.is_valid(config.probe_timeout).await {
                healthy += 1;
                if let Some(overflow) = self.push_idle(conn) {
                    overflow.close().await;
                }
            } else {
                warn!(
                    connection_id = conn.id(),
                    age = ?conn.age(),
                    "Discarding idle connection that failed health check"
                );
                conn.close().await;
            }
        }
        if healthy > 0 {
            debug!(healthy, "Idle connections passed health check");
            return Ok(());
        }

        loop {
            self.ensure_open()?;
            match self.open_connection().await {
                Ok(mut conn) => {
                    if conn.is_valid(config.validate_timeout).await {
                        info!(connection_id = conn.id(), "Database is reachable");
                        if let Some(overflow) = self.push_idle(conn) {
                            overflow.close().await;
                        }
                        return Ok(());
                    }
                    warn!(
                        connection_id = conn.id(),
                        "New connection failed validation"
                    );
                    conn.close().await;
                }
                Err(e) => {
                    warn!(error = %e, "Database unreachable");
                }
            }
            debug!(backoff = ?config.retry_backoff, "Waiting before next health check attempt");
            tokio::time::sleep(config.retry_backoff).await;
        }
    }

    /// Run `wait_until_healthy` every `interval` until the pool shuts down.
    pub fn spawn_health_check(&self, interval: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            while pool.is_initialized() {
                if let Err(e) = pool.wait_until_healthy().await {
                    debug!(error = %e, "Health check stopped");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
            debug!("Health check task finished");
        })
    }

    /// Close every idle connection and refuse further checkouts.
    ///
    /// Connections still checked out are closed when they are released.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle: Vec<PooledConnection> = self.inner.idle.lock().drain(..).collect();
        let closed = idle.len();
        for conn in idle {
            conn.close().await;
        }
        info!(
            closed,
            checked_out = self.inner.checked_out.load(Ordering::Acquire),
            "Connection pool shut down"
        );
    }
}
