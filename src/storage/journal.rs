use anyhow::{Context, anyhow};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{
    Amount, EXTERNAL_WALLET, EntryType, JournalLine, LedgerEntry, MinorUnits, Page, PageRequest,
    Scale, TypeFilter, Uid, WalletId,
};
use crate::error::LedgerError;

use super::{now_rfc3339, parse_timestamp};

/// Balance of a wallet as derived from its journal alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalTotals {
    pub balance: Decimal,
    pub entry_count: i64,
}

/// Append-only history of balance-affecting events.
pub struct TransactionJournal {
    pool: SqlitePool,
    scale: Scale,
}

impl TransactionJournal {
    pub fn new(pool: SqlitePool, scale: Scale) -> Self {
        Self { pool, scale }
    }

    /// Record one entry on the caller's unit-of-work connection.
    pub async fn append(
        &self,
        conn: &mut SqliteConnection,
        sender: WalletId,
        receiver: WalletId,
        amount: Amount,
        entry_type: EntryType,
    ) -> Result<LedgerEntry, LedgerError> {
        check_shape(sender, receiver, entry_type)?;
        let units = self.scale.to_units(amount.value())?;

        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (sender_wallet_id, receiver_wallet_id, amount, entry_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, sender_wallet_id, receiver_wallet_id, amount, entry_type, created_at
            "#,
        )
        .bind(sender)
        .bind(receiver)
        .bind(units)
        .bind(entry_type.code())
        .bind(now_rfc3339())
        .fetch_one(&mut *conn)
        .await?;

        self.row_to_entry(&row)
    }

    /// Entries where the wallet of `uid` is sender or receiver, newest first.
    pub async fn list_by_user(
        &self,
        uid: Uid,
        filter: TypeFilter,
        request: PageRequest,
    ) -> Result<Page<JournalLine>, LedgerError> {
        let wallet_id = self.wallet_id_for(uid).await?;

        let rows = sqlx::query(
            r#"
            SELECT
                e.id, e.sender_wallet_id, e.receiver_wallet_id, e.amount, e.entry_type, e.created_at,
                su.username AS sender_name,
                ru.username AS receiver_name
            FROM ledger_entries AS e
            LEFT JOIN wallets AS sw ON sw.id = e.sender_wallet_id
            LEFT JOIN users AS su ON su.id = sw.uid
            LEFT JOIN wallets AS rw ON rw.id = e.receiver_wallet_id
            LEFT JOIN users AS ru ON ru.id = rw.uid
            WHERE (e.sender_wallet_id = ? OR e.receiver_wallet_id = ?)
              AND (? IS NULL OR e.entry_type = ?)
            ORDER BY e.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(wallet_id)
        .bind(wallet_id)
        .bind(filter.code())
        .bind(filter.code())
        .bind(request.fetch_limit())
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await?;

        let lines = rows
            .iter()
            .map(|row| self.row_to_line(row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::from_probe(lines, request))
    }

    /// Sum of credits minus debits recorded for a wallet.
    pub async fn totals_for_wallet(&self, wallet_id: WalletId) -> Result<JournalTotals, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN receiver_wallet_id = ? THEN amount ELSE 0 END), 0) -
                COALESCE(SUM(CASE WHEN sender_wallet_id = ? THEN amount ELSE 0 END), 0) AS balance,
                COUNT(*) AS entry_count
            FROM ledger_entries
            WHERE sender_wallet_id = ? OR receiver_wallet_id = ?
            "#,
        )
        .bind(wallet_id)
        .bind(wallet_id)
        .bind(wallet_id)
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(JournalTotals {
            balance: self.scale.from_units(row.try_get("balance")?),
            entry_count: row.try_get("entry_count")?,
        })
    }

    async fn wallet_id_for(&self, uid: Uid) -> Result<WalletId, LedgerError> {
        let id: Option<WalletId> = sqlx::query_scalar("SELECT id FROM wallets WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        id.ok_or(LedgerError::WalletNotFound { uid })
    }

    fn row_to_entry(&self, row: &SqliteRow) -> Result<LedgerEntry, LedgerError> {
        let amount: MinorUnits = row.try_get("amount")?;
        let type_code: i64 = row.try_get("entry_type")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(LedgerEntry {
            id: row.try_get("id")?,
            sender_wallet_id: row.try_get("sender_wallet_id")?,
            receiver_wallet_id: row.try_get("receiver_wallet_id")?,
            amount: Amount::new(self.scale.from_units(amount))
                .context("Invalid ledger entry amount")?,
            entry_type: EntryType::from_code(type_code)
                .ok_or_else(|| anyhow!("Invalid entry type: {}", type_code))?,
            created_at: parse_timestamp(&created_at, "created_at")?,
        })
    }

    fn row_to_line(&self, row: &SqliteRow) -> Result<JournalLine, LedgerError> {
        Ok(JournalLine {
            entry: self.row_to_entry(row)?,
            sender_name: row.try_get("sender_name")?,
            receiver_name: row.try_get("receiver_name")?,
        })
    }
}

/// Deposits come from outside, withdrawals leave to outside, transfers
/// connect two real wallets.
fn check_shape(
    sender: WalletId,
    receiver: WalletId,
    entry_type: EntryType,
) -> Result<(), LedgerError> {
    let ok = match entry_type {
        EntryType::Deposit => sender == EXTERNAL_WALLET && receiver != EXTERNAL_WALLET,
        EntryType::Withdraw => sender != EXTERNAL_WALLET && receiver == EXTERNAL_WALLET,
        EntryType::Transfer => {
            sender != EXTERNAL_WALLET && receiver != EXTERNAL_WALLET && sender != receiver
        }
    };
    if ok {
        Ok(())
    } else {
        Err(anyhow!(
            "Malformed {} entry: sender {} receiver {}",
            entry_type,
            sender,
            receiver
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_shapes() {
        assert!(check_shape(EXTERNAL_WALLET, 4, EntryType::Deposit).is_ok());
        assert!(check_shape(4, EXTERNAL_WALLET, EntryType::Withdraw).is_ok());
        assert!(check_shape(4, 5, EntryType::Transfer).is_ok());

        assert!(check_shape(4, 5, EntryType::Deposit).is_err());
        assert!(check_shape(EXTERNAL_WALLET, 5, EntryType::Withdraw).is_err());
        assert!(check_shape(4, EXTERNAL_WALLET, EntryType::Transfer).is_err());
        assert!(check_shape(4, 4, EntryType::Transfer).is_err());
    }
}
