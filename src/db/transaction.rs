//! Connection sharing between linked statements and transaction finalization.
//!
//! A [`Session`] holds the checked-out connection of one statement group.
//! The owning statement and every statement linked to it keep a clone of the
//! same `Arc<SharedSession>`; the connection goes back to the pool when the
//! last of them closes. The rollback flag sits outside the lock so a dropped
//! member can raise it synchronously.

use crate::db::connection::PooledConnection;
use crate::db::pool::ConnectionPool;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Generate a unique transaction ID.
pub(crate) fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug)]
pub(crate) struct Session {
    /// `None` once the connection has been returned or discarded.
    pub(crate) connection: Option<PooledConnection>,
    /// Id of the open transaction, if any.
    pub(crate) transaction: Option<String>,
    /// Statements still in scope.
    pub(crate) open: usize,
}

impl Session {
    pub(crate) fn new(connection: PooledConnection, transaction: Option<String>) -> Self {
        Self {
            connection: Some(connection),
            transaction,
            open: 1,
        }
    }

    pub(crate) fn shared(self) -> Arc<SharedSession> {
        Arc::new(SharedSession {
            state: Mutex::new(self),
            failed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
pub(crate) struct SharedSession {
    pub(crate) state: Mutex<Session>,
    /// Set by any member that failed; forces rollback.
    failed: AtomicBool,
}

impl SharedSession {
    /// Mark the group for rollback. Without an open transaction the flag is
    /// never read.
    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    fn take_failed(&self) -> bool {
        self.failed.swap(false, Ordering::AcqRel)
    }
}

/// Close one statement's scope.
///
/// The owner finalizes an open transaction: rollback when any member failed,
/// commit otherwise. A failed commit or rollback discards the connection.
/// The connection returns to the pool once no member remains open.
pub(crate) async fn finish_scope(
    pool: &ConnectionPool,
    session: &SharedSession,
    owner: bool,
) -> DbResult<()> {
    let mut guard = session.state.lock().await;
    guard.open = guard.open.saturating_sub(1);

    let mut result = Ok(());
    if owner {
        if let Some(transaction_id) = guard.transaction.take() {
            let failed = session.take_failed();
            result = finalize(&mut guard, &transaction_id, failed).await;
            if result.is_err() {
                // State unknown; linked statements must not keep using it
                if let Some(conn) = guard.connection.take() {
                    pool.release(conn).await;
                }
            }
        }
    }

    if guard.open == 0 {
        if let Some(conn) = guard.connection.take() {
            drop(guard);
            pool.release(conn).await;
        }
    }
    result
}

async fn finalize(session: &mut Session, transaction_id: &str, failed: bool) -> DbResult<()> {
    let Some(conn) = session.connection.as_mut() else {
        return Err(DbError::transaction(
            "Connection was lost before the transaction finished",
            transaction_id,
        ));
    };

    if failed {
        match conn.conn_mut().rollback().await {
            Ok(()) => {
                info!(transaction_id = %transaction_id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                conn.mark_broken();
                Err(DbError::transaction(
                    format!("Rollback failed: {e}"),
                    transaction_id,
                ))
            }
        }
    } else {
        match conn.conn_mut().commit().await {
            Ok(()) => {
                info!(transaction_id = %transaction_id, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Commit failed, attempting rollback"
                );
                if let Err(rollback_err) = conn.conn_mut().rollback().await {
                    debug!(
                        transaction_id = %transaction_id,
                        error = %rollback_err,
                        "Rollback after failed commit also failed"
                    );
                }
                conn.mark_broken();
                Err(DbError::transaction(
                    format!("Commit failed: {e}"),
                    transaction_id,
                ))
            }
        }
    }
}
