use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{AmountError, Uid, UnknownEntryType};

/// Input rejected before any storage access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("invalid uid: {0}")]
    InvalidUid(Uid),

    #[error(transparent)]
    EntryType(#[from] UnknownEntryType),

    #[error("cannot transfer from a wallet to itself (uid {0})")]
    SelfTransfer(Uid),

    #[error("{0} is required")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Wallet not found for uid {uid}")]
    WalletNotFound { uid: Uid },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Balance limit exceeded for uid {uid}: balance may not exceed {limit}")]
    LimitExceeded { uid: Uid, limit: Decimal },

    #[error("Insufficient funds for uid {uid}: {required} required")]
    InsufficientFunds { uid: Uid, required: Decimal },

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Deadline exceeded; the operation was rolled back")]
    DeadlineExceeded,

    #[error("Operation cancelled; the operation was rolled back")]
    Cancelled,

    #[error("Storage temporarily unavailable: {0}")]
    TransientStore(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl LedgerError {
    /// True when retrying the whole operation as a fresh unit may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientStore(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}

impl From<AmountError> for LedgerError {
    fn from(err: AmountError) -> Self {
        LedgerError::Validation(err.into())
    }
}

// SQLite primary result codes for lock contention.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            return LedgerError::TransientStore(err);
        }
        LedgerError::Persistence(anyhow::Error::new(err))
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            // Extended codes keep the primary code in the low byte.
            let primary = code
                .parse::<i64>()
                .map(|c| (c & 0xff).to_string())
                .unwrap_or_else(|_| code.to_string());
            primary == SQLITE_BUSY || primary == SQLITE_LOCKED
        }),
        _ => false,
    }
}

/// True when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
