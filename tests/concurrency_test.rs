mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use rust_decimal_macros::dec;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use wallet_ledger::application::RequestContext;
use wallet_ledger::domain::{Amount, LedgerLimits, Scale};
use wallet_ledger::error::LedgerError;
use wallet_ledger::storage::{BalanceStore, UnitOfWork};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_never_exceed_cap() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let uid = open(&service, "alice").await?;
    let ctx = RequestContext::background();

    let (first, second) = tokio::join!(
        service.deposit(&ctx, uid, dec!(600000)),
        service.deposit(&ctx, uid, dec!(600000)),
    );

    let results = [first, second];
    let committed = results.iter().filter(|r| r.is_ok()).count();
    let limited = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::LimitExceeded { .. })))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(limited, 1);

    assert_eq!(service.balance(&ctx, uid).await?, dec!(600000));
    assert_eq!(entry_count(&service, uid).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let uid = open_funded(&service, "alice", dec!(100)).await?;
    let ctx = RequestContext::background();

    // Both advisory reads may see 100; only one guarded debit can succeed.
    let (first, second) = tokio::join!(
        service.withdraw(&ctx, uid, dec!(70)),
        service.withdraw(&ctx, uid, dec!(70)),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
            .count(),
        1
    );
    assert_eq!(service.balance(&ctx, uid).await?, dec!(30));
    Ok(())
}

#[tokio::test]
async fn test_guarded_debit_overrides_stale_read() -> Result<()> {
    let (service, pool, _temp) = test_service_and_pool().await?;
    let ctx = RequestContext::background();
    let uid = open_funded(&service, "alice", dec!(100)).await?;
    let balances = BalanceStore::new(pool.clone(), Scale::DEFAULT);

    // The advisory read approves a debit of 70.
    let seen = balances.balance(uid).await?;
    assert!(seen >= dec!(70));

    // Another writer commits first.
    service.withdraw(&ctx, uid, dec!(70)).await?;

    let mut unit = UnitOfWork::begin(&pool, "stale_read").await?;
    let outcome = balances
        .debit_if_above_floor(unit.conn(), uid, Amount::new(dec!(70))?, dec!(0))
        .await;
    let result = unit.settle(outcome).await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(service.balance(&ctx, uid).await?, dec!(30));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_complete_without_deadlock() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = open_funded(&service, "alice", dec!(1000)).await?;
    let bob = open_funded(&service, "bob", dec!(1000)).await?;
    let service = Arc::new(service);

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let service = Arc::clone(&service);
        let (from, to) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
        tasks.spawn(async move {
            service
                .transfer(&RequestContext::background(), from, to, dec!(10))
                .await
        });
    }

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        let mut committed = 0;
        while let Some(joined) = tasks.join_next().await {
            joined.expect("transfer task panicked")?;
            committed += 1;
        }
        Ok::<_, LedgerError>(committed)
    })
    .await
    .expect("transfers did not finish")?;
    assert_eq!(outcome, 20);

    let ctx = RequestContext::background();
    assert_eq!(service.balance(&ctx, alice).await?, dec!(1000));
    assert_eq!(service.balance(&ctx, bob).await?, dec!(1000));
    assert_eq!(entry_count(&service, alice).await?, 21);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_balance_stays_within_bounds_under_mixed_load() -> Result<()> {
    let limits = LedgerLimits {
        max_balance: dec!(500),
        min_balance: dec!(0),
        ..LedgerLimits::default()
    };
    let (service, _temp) = test_service_with(limits, no_prechecks()).await?;
    let alice = open_funded(&service, "alice", dec!(250)).await?;
    let bob = open_funded(&service, "bob", dec!(250)).await?;
    let service = Arc::new(service);

    let mut tasks = JoinSet::new();
    for i in 0..30 {
        let service = Arc::clone(&service);
        tasks.spawn(async move {
            let ctx = RequestContext::background();
            match i % 3 {
                0 => service.deposit(&ctx, alice, dec!(90)).await,
                1 => service.withdraw(&ctx, bob, dec!(80)).await,
                _ => service.transfer(&ctx, bob, alice, dec!(70)).await,
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(_)
            | Err(LedgerError::LimitExceeded { .. })
            | Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    let ctx = RequestContext::background();
    for uid in [alice, bob] {
        let balance = service.balance(&ctx, uid).await?;
        assert!(balance >= dec!(0) && balance <= dec!(500), "{}", balance);
        let report = service.reconcile(&ctx, uid).await?;
        assert!(report.is_consistent());
    }
    Ok(())
}

// ========================
// Deadlines and cancellation
// ========================

#[tokio::test]
async fn test_expired_deadline_leaves_state_untouched() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let uid = open_funded(&service, "alice", dec!(10)).await?;

    let expired = RequestContext::background().deadline_at(tokio::time::Instant::now());
    let result = service.deposit(&expired, uid, dec!(5)).await;
    assert!(matches!(result, Err(LedgerError::DeadlineExceeded)));

    let ctx = RequestContext::background();
    assert_eq!(service.balance(&ctx, uid).await?, dec!(10));
    assert_eq!(entry_count(&service, uid).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_request_does_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = open_funded(&service, "alice", dec!(10)).await?;
    let bob = open(&service, "bob").await?;

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = RequestContext::background().with_cancellation(token);

    let result = service.transfer(&cancelled, alice, bob, dec!(5)).await;
    assert!(matches!(result, Err(LedgerError::Cancelled)));

    let ctx = RequestContext::background();
    assert_eq!(service.balance(&ctx, alice).await?, dec!(10));
    assert_eq!(service.balance(&ctx, bob).await?, dec!(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_while_waiting_for_writer_rolls_back() -> Result<()> {
    let (service, pool, _temp) = test_service_and_pool().await?;
    let uid = open(&service, "alice").await?;
    let balances = BalanceStore::new(pool.clone(), Scale::DEFAULT);

    // Hold the write lock with an uncommitted credit.
    let mut blocker = UnitOfWork::begin(&pool, "blocker").await?;
    balances
        .credit_if_under_limit(blocker.conn(), uid, Amount::new(dec!(1))?, dec!(1000000))
        .await?;

    let ctx = RequestContext::with_timeout(Duration::from_millis(200));
    let result = service.deposit(&ctx, uid, dec!(5)).await;
    assert!(matches!(result, Err(LedgerError::DeadlineExceeded)));

    let released: Result<(), LedgerError> = Err(LedgerError::Cancelled);
    assert!(blocker.settle(released).await.is_err());

    let ctx = RequestContext::background();
    assert_eq!(service.balance(&ctx, uid).await?, dec!(0));
    assert_eq!(entry_count(&service, uid).await?, 0);
    Ok(())
}
