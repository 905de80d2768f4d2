use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Scale;

/// Identity of the user owning a wallet.
pub type Uid = i64;

pub type WalletId = i64;

/// Wallet id recorded on the external side of deposits and withdrawals.
pub const EXTERNAL_WALLET: WalletId = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub uid: Uid,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named wallet reads. Each variant carries its own typed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletLookup {
    ByUid(Uid),
    ById(WalletId),
}

/// Outcome of a guarded balance mutation: the row the statement touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub wallet_id: WalletId,
    pub uid: Uid,
    pub balance: Decimal,
}

/// Bounds every committed balance must respect, and the precision amounts
/// are stored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerLimits {
    pub max_balance: Decimal,
    pub min_balance: Decimal,
    pub amount_scale: Scale,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_balance: Decimal::from(1_000_000),
            min_balance: Decimal::ZERO,
            amount_scale: Scale::DEFAULT,
        }
    }
}

impl LedgerLimits {
    pub fn contains(&self, balance: Decimal) -> bool {
        balance >= self.min_balance && balance <= self.max_balance
    }
}
