use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LedgerError;

/// Per-request controls passed into every ledger operation.
///
/// When the deadline passes or the token is cancelled, the in-flight
/// operation future is dropped. Any open unit of work is dropped with it,
/// which rolls it back.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// No deadline, never cancelled unless the token is cancelled later.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive `operation` to completion unless the context fires first.
    pub(crate) async fn run<T, F>(&self, operation: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LedgerError::Cancelled),
            _ = expired => Err(LedgerError::DeadlineExceeded),
            result = operation => result,
        }
    }
}
