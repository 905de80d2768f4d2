use anyhow::{Context, anyhow};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::domain::{Scale, User, UserLookup, UserStatus, Wallet};
use crate::error::{LedgerError, is_unique_violation};

use super::{BalanceStore, now_rfc3339, parse_timestamp};

const USER_COLUMNS: &str = "id, username, email, status, created_at, updated_at";

const USER_BY_ID: &str =
    "SELECT id, username, email, status, created_at, updated_at FROM users WHERE id = ?";
const USER_BY_USERNAME: &str =
    "SELECT id, username, email, status, created_at, updated_at FROM users WHERE username = ?";
const USER_BY_EMAIL: &str =
    "SELECT id, username, email, status, created_at, updated_at FROM users WHERE email = ?";

/// Users and their wallets: creation at provisioning time plus typed lookups.
pub struct AccountDirectory {
    pool: SqlitePool,
    scale: Scale,
}

impl AccountDirectory {
    pub fn new(pool: SqlitePool, scale: Scale) -> Self {
        Self { pool, scale }
    }

    /// Insert a user and its zero-balance wallet on the caller's unit.
    pub async fn provision(
        &self,
        conn: &mut SqliteConnection,
        username: &str,
        email: &str,
    ) -> Result<(User, Wallet), LedgerError> {
        let now = now_rfc3339();

        let user_row = sqlx::query(&format!(
            "INSERT INTO users (username, email, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(username)
        .bind(email)
        .bind(UserStatus::Valid.code())
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                LedgerError::AccountExists(format!("{} <{}>", username, email))
            } else {
                err.into()
            }
        })?;
        let user = Self::row_to_user(&user_row)?;

        let wallet_row = sqlx::query(
            r#"
            INSERT INTO wallets (uid, balance, created_at, updated_at)
            VALUES (?, 0, ?, ?)
            RETURNING id, uid, balance, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await?;
        let wallet = BalanceStore::row_to_wallet(&wallet_row, self.scale)?;

        Ok((user, wallet))
    }

    pub async fn find_user(&self, lookup: &UserLookup) -> Result<Option<User>, LedgerError> {
        let query = match lookup {
            UserLookup::ById(id) => sqlx::query(USER_BY_ID).bind(*id),
            UserLookup::ByUsername(username) => {
                sqlx::query(USER_BY_USERNAME).bind(username.as_str())
            }
            UserLookup::ByEmail(email) => sqlx::query(USER_BY_EMAIL).bind(email.as_str()),
        };

        let row = query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    fn row_to_user(row: &SqliteRow) -> Result<User, LedgerError> {
        let status_code: i64 = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            status: UserStatus::from_code(status_code)
                .ok_or_else(|| anyhow!("Invalid user status: {}", status_code))?,
            created_at: parse_timestamp(&created_at, "created_at").context("Invalid user row")?,
            updated_at: parse_timestamp(&updated_at, "updated_at").context("Invalid user row")?,
        })
    }
}
