use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, EXTERNAL_WALLET, WalletId};

pub type EntryId = i64;

/// Kind of balance-affecting event. Codes are stable on disk and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Withdraw,
    Transfer,
}

impl EntryType {
    pub fn code(&self) -> i64 {
        match self {
            EntryType::Deposit => 1,
            EntryType::Withdraw => 2,
            EntryType::Transfer => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EntryType::Deposit),
            2 => Some(EntryType::Withdraw),
            3 => Some(EntryType::Transfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdraw => "withdraw",
            EntryType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = UnknownEntryType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deposit" => Ok(EntryType::Deposit),
            "withdraw" => Ok(EntryType::Withdraw),
            "transfer" => Ok(EntryType::Transfer),
            other => Err(UnknownEntryType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction type: {0}")]
pub struct UnknownEntryType(pub String);

/// History restriction. `None` means every type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeFilter(Option<EntryType>);

impl TypeFilter {
    pub const ALL: TypeFilter = TypeFilter(None);

    pub fn only(entry_type: EntryType) -> Self {
        Self(Some(entry_type))
    }

    /// Wire form: 0 is "all types", 1..=3 select one type.
    pub fn from_code(code: i64) -> Result<Self, UnknownEntryType> {
        if code == 0 {
            return Ok(Self::ALL);
        }
        EntryType::from_code(code)
            .map(Self::only)
            .ok_or_else(|| UnknownEntryType(code.to_string()))
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        self.0
    }

    pub fn code(&self) -> Option<i64> {
        self.0.map(|t| t.code())
    }
}

/// Accepts "all", a wire code ("0".."3") or a type name.
impl FromStr for TypeFilter {
    type Err = UnknownEntryType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL);
        }
        match s.parse::<i64>() {
            Ok(code) => Self::from_code(code),
            Err(_) => s.parse::<EntryType>().map(Self::only),
        }
    }
}

impl From<Option<EntryType>> for TypeFilter {
    fn from(value: Option<EntryType>) -> Self {
        Self(value)
    }
}

/// One immutable journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    /// `EXTERNAL_WALLET` for deposits
    pub sender_wallet_id: WalletId,
    /// `EXTERNAL_WALLET` for withdrawals
    pub receiver_wallet_id: WalletId,
    pub amount: Amount,
    pub entry_type: EntryType,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed effect of this entry on the given wallet.
    pub fn delta_for(&self, wallet_id: WalletId) -> Decimal {
        let amount = self.amount.value();
        let mut delta = Decimal::ZERO;
        if self.receiver_wallet_id == wallet_id {
            delta += amount;
        }
        if self.sender_wallet_id == wallet_id {
            delta -= amount;
        }
        delta
    }

    pub fn is_external(&self) -> bool {
        self.sender_wallet_id == EXTERNAL_WALLET || self.receiver_wallet_id == EXTERNAL_WALLET
    }
}

/// A journal record as seen in history, with display names joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
}

impl JournalLine {
    /// Name of the other side from the point of view of `wallet_id`.
    /// `None` when the other side is external.
    pub fn counterparty(&self, wallet_id: WalletId) -> Option<&str> {
        if self.entry.sender_wallet_id == wallet_id {
            self.receiver_name.as_deref()
        } else {
            self.sender_name.as_deref()
        }
    }
}
