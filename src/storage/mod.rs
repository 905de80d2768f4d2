mod accounts;
mod balance_store;
mod journal;
mod unit_of_work;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

pub use accounts::*;
pub use balance_store::*;
pub use journal::*;
pub use unit_of_work::*;

use crate::config::DatabaseConfig;
use crate::domain::Scale;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Open a connection pool for the configured SQLite database.
/// Creates the database file if it doesn't exist.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database url: {}", config.url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    tracing::debug!(url = %config.url, max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

/// Run database migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(MIGRATION_001_INITIAL)
        .execute(pool)
        .await
        .context("Failed to run migration 001")?;
    Ok(())
}

/// Record the amount scale on first use and refuse a different one later.
/// Stored integers mean nothing once read at another scale.
pub async fn pin_scale(pool: &SqlitePool, scale: Scale) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO ledger_meta (key, value) VALUES ('amount_scale', ?)")
        .bind(i64::from(scale.digits()))
        .execute(pool)
        .await
        .context("Failed to record amount scale")?;

    let stored: i64 =
        sqlx::query_scalar("SELECT value FROM ledger_meta WHERE key = 'amount_scale'")
            .fetch_one(pool)
            .await
            .context("Failed to read amount scale")?;
    if stored != i64::from(scale.digits()) {
        bail!(
            "Database uses amount scale {}, configuration asks for {}",
            stored,
            scale.digits()
        );
    }
    Ok(())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(raw: &str, column: &'static str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid {} timestamp", column))?
        .with_timezone(&Utc))
}
