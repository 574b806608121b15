//! named-sql - Main entry point.
//!
//! Thin operational harness over the library: translate a template, wait for
//! the database to become healthy, or execute one statement and print the
//! outcome as JSON on stdout. Logs go to stderr.

use clap::Parser;
use named_sql::config::{Command, Config};
use named_sql::models::{DriverKind, SqlValue};
use named_sql::sql::NamedSql;
use named_sql::{ConnectionPool, DbResult};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn translate(config: &Config, template: &str, driver: Option<DriverKind>) -> DbResult<()> {
    let driver = driver
        .or_else(|| {
            config
                .url
                .as_deref()
                .and_then(DriverKind::from_connection_string)
        })
        .unwrap_or(DriverKind::MySql);
    let sql = NamedSql::parse(template, driver.into())?;
    let slots: Vec<_> = sql
        .slots()
        .iter()
        .map(|s| json!({ "name": s.name, "type_hint": s.type_hint }))
        .collect();
    let output = json!({
        "driver": driver,
        "rewritten_sql": sql.rewritten_sql(),
        "kind": format!("{:?}", sql.kind()),
        "slots": slots,
    });
    println!("{output:#}");
    Ok(())
}

async fn check(pool: &ConnectionPool) -> DbResult<()> {
    pool.wait_until_healthy().await?;
    println!("{:#}", json!({ "healthy": true, "pool": pool.status() }));
    Ok(())
}

async fn exec(pool: &ConnectionPool, template: &str, params: &[(String, String)]) -> DbResult<()> {
    let mut stmt = pool.statement(template).await?;
    stmt.bind_all(
        params
            .iter()
            .map(|(name, raw)| (name.clone(), SqlValue::parse_literal(raw))),
    );

    let outcome = stmt.execute().await;
    let output = match outcome {
        Ok(ok) => {
            let rows: Vec<_> = stmt.records().iter().map(|r| r.to_json_map()).collect();
            Ok(json!({
                "ok": ok,
                "updated_count": stmt.updated_count(),
                "generated_keys": stmt.generated_keys(),
                "columns": stmt.column_names(),
                "rows": rows,
            }))
        }
        Err(e) => Err(e),
    };
    // Release before reporting so a failure still returns the connection
    stmt.close().await?;
    println!("{:#}", output?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if let Command::Translate { template, driver } = &config.command {
        translate(&config, template, *driver)?;
        return Ok(());
    }

    let pool = ConnectionPool::initialize(config.pool_config()?)?;
    info!(
        driver = %pool.driver(),
        "Starting named-sql v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match &config.command {
        Command::Check => check(&pool).await,
        Command::Exec { template, params } => exec(&pool, template, params).await,
        Command::Translate { .. } => Ok(()),
    };
    pool.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Command failed");
        return Err(e.into());
    }
    Ok(())
}
