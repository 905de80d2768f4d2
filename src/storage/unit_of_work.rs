use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::error::LedgerError;

/// One atomic unit of work over the ledger tables.
///
/// The unit rolls back on every exit path except an explicit successful
/// [`settle`](UnitOfWork::settle) of an `Ok` outcome. Dropping it (an early
/// return, a panic, or a cancelled future) rolls back through the
/// underlying `sqlx::Transaction`.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    label: &'static str,
}

impl UnitOfWork {
    pub async fn begin(pool: &SqlitePool, label: &'static str) -> Result<Self, LedgerError> {
        let tx = pool.begin().await?;
        tracing::debug!(unit = label, "unit of work started");
        Ok(Self { tx, label })
    }

    /// Connection to issue statements on. Everything executed here commits
    /// or rolls back together.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Commit when `outcome` is `Ok`, otherwise roll back and hand the
    /// original error back unchanged.
    pub async fn settle<T>(self, outcome: Result<T, LedgerError>) -> Result<T, LedgerError> {
        let label = self.label;
        match outcome {
            Ok(value) => {
                self.tx.commit().await?;
                tracing::debug!(unit = label, "unit of work committed");
                Ok(value)
            }
            Err(err) => {
                match self.tx.rollback().await {
                    Ok(()) => tracing::debug!(unit = label, error = %err, "unit of work rolled back"),
                    Err(rollback_err) => tracing::error!(
                        unit = label,
                        error = %err,
                        rollback_error = %rollback_err,
                        "rollback failed; connection will be discarded"
                    ),
                }
                Err(err)
            }
        }
    }
}
