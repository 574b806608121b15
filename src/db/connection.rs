//! Physical connections and the pool's wrapper around them.

use crate::config::PoolConfig;
use crate::error::DbResult;
use crate::models::DriverKind;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// One open driver connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Open a new physical connection.
    ///
    /// Explicit credentials in `config` override any embedded in the URL.
    /// SQLite has no credentials and ignores them.
    pub async fn open(config: &PoolConfig) -> DbResult<Self> {
        let conn = match config.driver {
            DriverKind::MySql => {
                let mut opts = MySqlConnectOptions::from_str(&config.url)?;
                if let Some(user) = &config.user {
                    opts = opts.username(user);
                }
                if let Some(password) = &config.password {
                    opts = opts.password(password);
                }
                Self::MySql(MySqlConnection::connect_with(&opts).await?)
            }
            DriverKind::Postgres => {
                let mut opts = PgConnectOptions::from_str(&config.url)?;
                if let Some(user) = &config.user {
                    opts = opts.username(user);
                }
                if let Some(password) = &config.password {
                    opts = opts.password(password);
                }
                Self::Postgres(PgConnection::connect_with(&opts).await?)
            }
            DriverKind::SQLite => {
                let opts = SqliteConnectOptions::from_str(&config.url)?;
                Self::SQLite(SqliteConnection::connect_with(&opts).await?)
            }
        };
        Ok(conn)
    }

    pub fn driver(&self) -> DriverKind {
        impl_db_dispatch!(self, {
            MySql(_c) => DriverKind::MySql,
            Postgres(_c) => DriverKind::Postgres,
            SQLite(_c) => DriverKind::SQLite,
        })
    }

    pub async fn ping(&mut self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => c.ping().await?,
            Postgres(c) => c.ping().await?,
            SQLite(c) => c.ping().await?,
        });
        Ok(())
    }

    /// Run an unprepared statement that returns no rows.
    pub async fn execute_raw(&mut self, sql: &str) -> DbResult<u64> {
        let affected = impl_db_dispatch!(self, {
            MySql(c) => c.execute(sql).await?.rows_affected(),
            Postgres(c) => c.execute(sql).await?.rows_affected(),
            SQLite(c) => c.execute(sql).await?.rows_affected(),
        });
        Ok(affected)
    }

    pub async fn begin(&mut self) -> DbResult<()> {
        self.execute_raw("BEGIN").await.map(|_| ())
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        self.execute_raw("COMMIT").await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        self.execute_raw("ROLLBACK").await.map(|_| ())
    }

    pub async fn close(self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => c.close().await?,
            Postgres(c) => c.close().await?,
            SQLite(c) => c.close().await?,
        });
        Ok(())
    }
}

/// A physical connection owned by the pool or checked out from it.
#[derive(Debug)]
pub struct PooledConnection {
    conn: DbConnection,
    id: u64,
    created_at: Instant,
    broken: bool,
}

impl PooledConnection {
    pub(crate) fn new(conn: DbConnection, id: u64) -> Self {
        Self {
            conn,
            id,
            created_at: Instant::now(),
            broken: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn conn_mut(&mut self) -> &mut DbConnection {
        &mut self.conn
    }

    /// Liveness probe bounded by `timeout`. A timeout counts as invalid.
    pub async fn is_valid(&mut self, timeout: Duration) -> bool {
        if self.broken {
            return false;
        }
        match tokio::time::timeout(timeout, self.conn.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(connection_id = self.id, error = %e, "Liveness probe failed");
                false
            }
            Err(_) => {
                debug!(connection_id = self.id, ?timeout, "Liveness probe timed out");
                false
            }
        }
    }

    /// Flag the connection so the pool closes it instead of re-pooling it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Close the physical connection, ignoring driver errors.
    pub async fn close(self) {
        let id = self.id;
        if let Err(e) = self.conn.close().await {
            debug!(connection_id = id, error = %e, "Error while closing connection");
        }
    }
}
