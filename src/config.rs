use std::path::Path;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::LedgerLimits;

/// Prefix for environment overrides, e.g. `WALLET_LEDGER_LIMITS__MAX_BALANCE`.
pub const ENV_PREFIX: &str = "WALLET_LEDGER";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "wallet-ledger";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub limits: LedgerLimits,
    pub ledger: LedgerSettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// How long a writer waits on the SQLite write lock.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:wallet-ledger.db".to_string(),
            max_connections: 8,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    /// Config for a database file at `path`.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            url: format!("sqlite:{}", path.as_ref().display()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Read the balance before a withdrawal to fail fast. Advisory only.
    pub advisory_prechecks: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            advisory_prechecks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LedgerConfig {
    /// Layered load: defaults, then the config file (explicit path, or an
    /// optional `wallet-ledger.{toml,yaml,json}`), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: LedgerConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        let scale = limits.amount_scale;
        scale
            .to_units(limits.max_balance)
            .context("Invalid limits.max_balance")?;
        scale
            .to_units(limits.min_balance)
            .context("Invalid limits.min_balance")?;
        if limits.min_balance.is_sign_negative() {
            bail!("limits.min_balance must not be negative");
        }
        if limits.min_balance >= limits.max_balance {
            bail!(
                "limits.min_balance ({}) must be below limits.max_balance ({})",
                limits.min_balance,
                limits.max_balance
            );
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        Ok(())
    }
}
