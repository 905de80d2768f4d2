use anyhow::Context;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{Amount, BalanceChange, Scale, Uid, Wallet, WalletLookup};
use crate::error::LedgerError;

use super::{now_rfc3339, parse_timestamp};

/// Owner of wallet balances.
///
/// Mutations run on the caller's unit-of-work connection and are single
/// predicate-guarded statements: the bound check is evaluated against the
/// row's committed value by the same statement that changes it, never by a
/// separate read.
pub struct BalanceStore {
    pool: SqlitePool,
    scale: Scale,
}

impl BalanceStore {
    pub fn new(pool: SqlitePool, scale: Scale) -> Self {
        Self { pool, scale }
    }

    /// Increase the balance of `uid` by `amount` unless the result would
    /// exceed `limit`.
    pub async fn credit_if_under_limit(
        &self,
        conn: &mut SqliteConnection,
        uid: Uid,
        amount: Amount,
        limit: Decimal,
    ) -> Result<BalanceChange, LedgerError> {
        let units = self.scale.to_units(amount.value())?;
        let limit_units = self.scale.to_units(limit)?;

        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + ?, updated_at = ?
            WHERE uid = ? AND balance + ? <= ?
            RETURNING id, uid, balance
            "#,
        )
        .bind(units)
        .bind(now_rfc3339())
        .bind(uid)
        .bind(units)
        .bind(limit_units)
        .fetch_optional(&mut *conn)
        .await?;

        // Zero rows touched: the guard rejected the update or the wallet is missing.
        let Some(row) = row else {
            return Err(if Self::wallet_exists(conn, uid).await? {
                LedgerError::LimitExceeded { uid, limit }
            } else {
                LedgerError::WalletNotFound { uid }
            });
        };
        self.row_to_change(&row)
    }

    /// Decrease the balance of `uid` by `amount` unless the result would
    /// drop below `floor`.
    pub async fn debit_if_above_floor(
        &self,
        conn: &mut SqliteConnection,
        uid: Uid,
        amount: Amount,
        floor: Decimal,
    ) -> Result<BalanceChange, LedgerError> {
        let units = self.scale.to_units(amount.value())?;
        let floor_units = self.scale.to_units(floor)?;

        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance - ?, updated_at = ?
            WHERE uid = ? AND balance - ? >= ?
            RETURNING id, uid, balance
            "#,
        )
        .bind(units)
        .bind(now_rfc3339())
        .bind(uid)
        .bind(units)
        .bind(floor_units)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Err(if Self::wallet_exists(conn, uid).await? {
                LedgerError::InsufficientFunds {
                    uid,
                    required: amount.value(),
                }
            } else {
                LedgerError::WalletNotFound { uid }
            });
        };
        self.row_to_change(&row)
    }

    /// Committed balance of the wallet owned by `uid`.
    pub async fn balance(&self, uid: Uid) -> Result<Decimal, LedgerError> {
        let units: Option<i64> = sqlx::query_scalar("SELECT balance FROM wallets WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        units
            .map(|units| self.scale.from_units(units))
            .ok_or(LedgerError::WalletNotFound { uid })
    }

    pub async fn wallet(&self, lookup: WalletLookup) -> Result<Option<Wallet>, LedgerError> {
        let query = match lookup {
            WalletLookup::ByUid(uid) => sqlx::query(
                "SELECT id, uid, balance, created_at, updated_at FROM wallets WHERE uid = ?",
            )
            .bind(uid),
            WalletLookup::ById(id) => sqlx::query(
                "SELECT id, uid, balance, created_at, updated_at FROM wallets WHERE id = ?",
            )
            .bind(id),
        };

        let row = query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_wallet(&row, self.scale)?)),
            None => Ok(None),
        }
    }

    async fn wallet_exists(conn: &mut SqliteConnection, uid: Uid) -> Result<bool, LedgerError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM wallets WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(found.is_some())
    }

    fn row_to_change(&self, row: &SqliteRow) -> Result<BalanceChange, LedgerError> {
        Ok(BalanceChange {
            wallet_id: row.try_get("id")?,
            uid: row.try_get("uid")?,
            balance: self.scale.from_units(row.try_get("balance")?),
        })
    }

    pub(crate) fn row_to_wallet(row: &SqliteRow, scale: Scale) -> Result<Wallet, LedgerError> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Wallet {
            id: row.try_get("id")?,
            uid: row.try_get("uid")?,
            balance: scale.from_units(row.try_get("balance")?),
            created_at: parse_timestamp(&created_at, "created_at")
                .context("Invalid wallet row")?,
            updated_at: parse_timestamp(&updated_at, "updated_at")
                .context("Invalid wallet row")?,
        })
    }
}
