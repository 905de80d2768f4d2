// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tempfile::TempDir;
use wallet_ledger::application::{LedgerService, RequestContext};
use wallet_ledger::config::{DatabaseConfig, LedgerConfig, LedgerSettings};
use wallet_ledger::domain::{LedgerLimits, TypeFilter, Uid};
use wallet_ledger::storage;

/// Config pointing at a fresh database file inside `temp_dir`.
pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    LedgerConfig {
        database: DatabaseConfig::for_path(temp_dir.path().join("test.db")),
        ..LedgerConfig::default()
    }
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(LedgerLimits::default(), LedgerSettings::default()).await
}

pub async fn test_service_with(
    limits: LedgerLimits,
    settings: LedgerSettings,
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = test_config(&temp_dir);
    config.limits = limits;
    config.ledger = settings;
    let service = LedgerService::connect(&config).await?;
    Ok((service, temp_dir))
}

/// Service plus a second handle on its pool, for driving the stores directly.
pub async fn test_service_and_pool() -> Result<(LedgerService, SqlitePool, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = test_config(&temp_dir);
    let pool = storage::connect(&config.database).await?;
    storage::migrate(&pool).await?;
    storage::pin_scale(&pool, config.limits.amount_scale).await?;
    let service = LedgerService::new(pool.clone(), config.limits, config.ledger.clone());
    Ok((service, pool, temp_dir))
}

pub fn no_prechecks() -> LedgerSettings {
    LedgerSettings {
        advisory_prechecks: false,
    }
}

/// Open an account named `username` and return its uid.
pub async fn open(service: &LedgerService, username: &str) -> Result<Uid> {
    let account = service
        .open_account(
            &RequestContext::background(),
            username,
            &format!("{}@example.com", username),
        )
        .await?;
    Ok(account.user.id)
}

/// Open an account and deposit `amount` into it.
pub async fn open_funded(service: &LedgerService, username: &str, amount: Decimal) -> Result<Uid> {
    let uid = open(service, username).await?;
    service
        .deposit(&RequestContext::background(), uid, amount)
        .await?;
    Ok(uid)
}

/// Number of journal entries visible in the history of `uid`.
pub async fn entry_count(service: &LedgerService, uid: Uid) -> Result<usize> {
    let page = service
        .list_transactions(&RequestContext::background(), uid, TypeFilter::ALL, 1, 100)
        .await?;
    Ok(page.len())
}
