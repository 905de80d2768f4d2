use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::{LedgerConfig, LedgerSettings};
use crate::domain::{
    Amount, AmountError, BalanceChange, EXTERNAL_WALLET, EntryType, JournalLine, LedgerEntry,
    LedgerLimits, Page, PageRequest, TypeFilter, Uid, User, UserLookup, Wallet, WalletLookup,
};
use crate::error::{LedgerError, ValidationError};
use crate::storage::{self, AccountDirectory, BalanceStore, TransactionJournal, UnitOfWork};

use super::RequestContext;

/// Application service providing the ledger operations.
/// This is the primary interface for any client (CLI, HTTP handler, etc.).
pub struct LedgerService {
    pool: SqlitePool,
    balances: BalanceStore,
    journal: TransactionJournal,
    accounts: AccountDirectory,
    limits: LedgerLimits,
    settings: LedgerSettings,
}

/// Result of provisioning an account
#[derive(Debug, Clone)]
pub struct OpenedAccount {
    pub user: User,
    pub wallet: Wallet,
}

/// Stored balance compared against the balance implied by the journal.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub wallet: Wallet,
    pub journal_balance: Decimal,
    pub entry_count: i64,
    pub within_limits: bool,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.within_limits && self.wallet.balance == self.journal_balance
    }
}

impl LedgerService {
    /// Create a service over an existing pool. The pool is shared by every
    /// store; no global handle exists.
    pub fn new(pool: SqlitePool, limits: LedgerLimits, settings: LedgerSettings) -> Self {
        Self {
            balances: BalanceStore::new(pool.clone(), limits.amount_scale),
            journal: TransactionJournal::new(pool.clone(), limits.amount_scale),
            accounts: AccountDirectory::new(pool.clone(), limits.amount_scale),
            pool,
            limits,
            settings,
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = storage::connect(&config.database).await?;
        storage::migrate(&pool).await?;
        storage::pin_scale(&pool, config.limits.amount_scale).await?;
        Ok(Self::new(pool, config.limits, config.ledger.clone()))
    }

    pub fn limits(&self) -> LedgerLimits {
        self.limits
    }

    // ========================
    // Accounts
    // ========================

    /// Create a user together with its empty wallet.
    pub async fn open_account(
        &self,
        ctx: &RequestContext,
        username: &str,
        email: &str,
    ) -> Result<OpenedAccount, LedgerError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(ValidationError::MissingField("username").into());
        }
        if email.is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }

        let (user, wallet) = ctx
            .run(async {
                let mut unit = UnitOfWork::begin(&self.pool, "open_account").await?;
                let outcome = self.accounts.provision(unit.conn(), username, email).await;
                unit.settle(outcome).await
            })
            .await
            .inspect_err(|err| log_rejection("open_account", err))?;

        tracing::info!(uid = user.id, wallet_id = wallet.id, username = %user.username, "account opened");
        Ok(OpenedAccount { user, wallet })
    }

    pub async fn find_user(&self, lookup: UserLookup) -> Result<User, LedgerError> {
        self.accounts
            .find_user(&lookup)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(lookup.to_string()))
    }

    pub async fn find_wallet(&self, lookup: WalletLookup) -> Result<Option<Wallet>, LedgerError> {
        self.balances.wallet(lookup).await
    }

    // ========================
    // Ledger operations
    // ========================

    /// Credit `amount` from outside the ledger to the wallet of `uid`.
    pub async fn deposit(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        amount: Decimal,
    ) -> Result<LedgerEntry, LedgerError> {
        check_uid(uid)?;
        let amount = Amount::new(amount)?;
        let storable = self.fits_scale(amount)?;

        let entry = ctx
            .run(async {
                if !storable {
                    return Err(self.reject_oversized(uid, amount, Side::Credit).await);
                }
                let mut unit = UnitOfWork::begin(&self.pool, "deposit").await?;
                let outcome = self.apply_deposit(unit.conn(), uid, amount).await;
                unit.settle(outcome).await
            })
            .await
            .inspect_err(|err| log_rejection("deposit", err))?;

        tracing::info!(uid, amount = %amount, entry_id = entry.id, "deposit committed");
        Ok(entry)
    }

    /// Debit `amount` from the wallet of `uid` to outside the ledger.
    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        amount: Decimal,
    ) -> Result<LedgerEntry, LedgerError> {
        check_uid(uid)?;
        let amount = Amount::new(amount)?;
        let storable = self.fits_scale(amount)?;

        let entry = ctx
            .run(async {
                if !storable {
                    return Err(self.reject_oversized(uid, amount, Side::Debit).await);
                }
                self.precheck_funds(uid, amount).await?;
                let mut unit = UnitOfWork::begin(&self.pool, "withdraw").await?;
                let outcome = self.apply_withdraw(unit.conn(), uid, amount).await;
                unit.settle(outcome).await
            })
            .await
            .inspect_err(|err| log_rejection("withdraw", err))?;

        tracing::info!(uid, amount = %amount, entry_id = entry.id, "withdraw committed");
        Ok(entry)
    }

    /// Move `amount` from the wallet of `from_uid` to the wallet of `to_uid`.
    /// Both balance changes and the journal entry commit together or not at all.
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        from_uid: Uid,
        to_uid: Uid,
        amount: Decimal,
    ) -> Result<LedgerEntry, LedgerError> {
        check_uid(from_uid)?;
        check_uid(to_uid)?;
        if from_uid == to_uid {
            return Err(ValidationError::SelfTransfer(from_uid).into());
        }
        let amount = Amount::new(amount)?;
        let storable = self.fits_scale(amount)?;

        let entry = ctx
            .run(async {
                if !storable {
                    // Fail on whichever wallet the unit would touch first.
                    return Err(if from_uid < to_uid {
                        self.reject_oversized(from_uid, amount, Side::Debit).await
                    } else {
                        self.reject_oversized(to_uid, amount, Side::Credit).await
                    });
                }
                self.precheck_funds(from_uid, amount).await?;
                let mut unit = UnitOfWork::begin(&self.pool, "transfer").await?;
                let outcome = self
                    .apply_transfer(unit.conn(), from_uid, to_uid, amount)
                    .await;
                unit.settle(outcome).await
            })
            .await
            .inspect_err(|err| log_rejection("transfer", err))?;

        tracing::info!(
            from_uid,
            to_uid,
            amount = %amount,
            entry_id = entry.id,
            "transfer committed"
        );
        Ok(entry)
    }

    /// Committed balance of the wallet of `uid`.
    pub async fn balance(&self, ctx: &RequestContext, uid: Uid) -> Result<Decimal, LedgerError> {
        check_uid(uid)?;
        ctx.run(self.balances.balance(uid)).await
    }

    /// History of the wallet of `uid`, newest first.
    pub async fn list_transactions(
        &self,
        ctx: &RequestContext,
        uid: Uid,
        filter: TypeFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<JournalLine>, LedgerError> {
        check_uid(uid)?;
        let request = PageRequest::clamp(page, page_size);
        ctx.run(self.journal.list_by_user(uid, filter, request))
            .await
    }

    /// Recompute the balance of `uid` from its journal and compare.
    pub async fn reconcile(
        &self,
        ctx: &RequestContext,
        uid: Uid,
    ) -> Result<Reconciliation, LedgerError> {
        check_uid(uid)?;
        ctx.run(async {
            let wallet = self
                .balances
                .wallet(WalletLookup::ByUid(uid))
                .await?
                .ok_or(LedgerError::WalletNotFound { uid })?;
            let totals = self.journal.totals_for_wallet(wallet.id).await?;

            let reconciliation = Reconciliation {
                within_limits: self.limits.contains(wallet.balance),
                journal_balance: totals.balance,
                entry_count: totals.entry_count,
                wallet,
            };
            if !reconciliation.is_consistent() {
                tracing::error!(
                    uid,
                    stored = %reconciliation.wallet.balance,
                    journal = %reconciliation.journal_balance,
                    "wallet balance does not match its journal"
                );
            }
            Ok(reconciliation)
        })
        .await
    }

    // ========================
    // Unit-of-work bodies
    // ========================

    async fn apply_deposit(
        &self,
        conn: &mut SqliteConnection,
        uid: Uid,
        amount: Amount,
    ) -> Result<LedgerEntry, LedgerError> {
        let credited = self
            .balances
            .credit_if_under_limit(conn, uid, amount, self.limits.max_balance)
            .await?;
        trace_change("credit", &credited);
        self.journal
            .append(conn, EXTERNAL_WALLET, credited.wallet_id, amount, EntryType::Deposit)
            .await
    }

    async fn apply_withdraw(
        &self,
        conn: &mut SqliteConnection,
        uid: Uid,
        amount: Amount,
    ) -> Result<LedgerEntry, LedgerError> {
        let debited = self
            .balances
            .debit_if_above_floor(conn, uid, amount, self.limits.min_balance)
            .await?;
        trace_change("debit", &debited);
        self.journal
            .append(conn, debited.wallet_id, EXTERNAL_WALLET, amount, EntryType::Withdraw)
            .await
    }

    async fn apply_transfer(
        &self,
        conn: &mut SqliteConnection,
        from_uid: Uid,
        to_uid: Uid,
        amount: Amount,
    ) -> Result<LedgerEntry, LedgerError> {
        // Wallets are touched in ascending uid order whatever the direction.
        let (debited, credited) = if from_uid < to_uid {
            let debited = self
                .balances
                .debit_if_above_floor(conn, from_uid, amount, self.limits.min_balance)
                .await?;
            let credited = self
                .balances
                .credit_if_under_limit(conn, to_uid, amount, self.limits.max_balance)
                .await?;
            (debited, credited)
        } else {
            let credited = self
                .balances
                .credit_if_under_limit(conn, to_uid, amount, self.limits.max_balance)
                .await?;
            let debited = self
                .balances
                .debit_if_above_floor(conn, from_uid, amount, self.limits.min_balance)
                .await?;
            (debited, credited)
        };
        trace_change("debit", &debited);
        trace_change("credit", &credited);

        self.journal
            .append(
                conn,
                debited.wallet_id,
                credited.wallet_id,
                amount,
                EntryType::Transfer,
            )
            .await
    }

    /// `Ok(false)` when the amount is valid but too large to store. Digits
    /// finer than the ledger's scale are a validation error.
    fn fits_scale(&self, amount: Amount) -> Result<bool, ValidationError> {
        match self.limits.amount_scale.to_units(amount.value()) {
            Ok(_) => Ok(true),
            Err(AmountError::OutOfRange(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// An amount too large to store can never pass a balance bound, so it
    /// fails the same way an oversized but storable one would.
    async fn reject_oversized(&self, uid: Uid, amount: Amount, side: Side) -> LedgerError {
        if let Err(err) = self.balances.balance(uid).await {
            return err;
        }
        match side {
            Side::Credit => LedgerError::LimitExceeded {
                uid,
                limit: self.limits.max_balance,
            },
            Side::Debit => LedgerError::InsufficientFunds {
                uid,
                required: amount.value(),
            },
        }
    }

    /// Fast-fail read before a debit. Not authoritative: the guarded update
    /// inside the unit decides.
    async fn precheck_funds(&self, uid: Uid, amount: Amount) -> Result<(), LedgerError> {
        if !self.settings.advisory_prechecks {
            return Ok(());
        }
        let balance = self.balances.balance(uid).await?;
        if balance - amount.value() < self.limits.min_balance {
            return Err(LedgerError::InsufficientFunds {
                uid,
                required: amount.value(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Credit,
    Debit,
}

fn trace_change(side: &'static str, change: &BalanceChange) {
    tracing::debug!(
        side,
        uid = change.uid,
        wallet_id = change.wallet_id,
        balance = %change.balance,
        "balance updated"
    );
}

fn check_uid(uid: Uid) -> Result<(), ValidationError> {
    if uid <= 0 {
        return Err(ValidationError::InvalidUid(uid));
    }
    Ok(())
}

fn log_rejection(operation: &'static str, err: &LedgerError) {
    match err {
        LedgerError::Persistence(_) | LedgerError::TransientStore(_) => {
            tracing::error!(operation, error = %err, "ledger operation failed")
        }
        _ => tracing::warn!(operation, error = %err, "ledger operation rejected"),
    }
}
