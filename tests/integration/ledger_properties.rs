//! Money is never created, destroyed or duplicated.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use wager_ledger::odds::entropy::{FixedEntropy, SeededEntropy};
use wager_ledger::storage::LedgerStore;
use wager_ledger::types::*;
use wager_ledger::WageringEngine;

use crate::fixtures::{self, DOUBLE, ROULETTE, SLOTS};
use crate::mock_store::MockStore;

async fn assert_reconciles(engine: &WageringEngine, user_id: uuid::Uuid) {
    let rec = engine.verify_account(user_id).await.unwrap();
    assert!(
        rec.is_consistent(),
        "balance {} vs ledger {} ({} broken entries)",
        rec.balance,
        rec.ledger_total,
        rec.broken_entries.len()
    );
    assert!(rec.balance >= Decimal::ZERO);
}

/// Random mix of bets, deposits and withdrawals; the ledger must reconcile
/// after every step whatever the outcome.
async fn random_activity(store: Arc<dyn LedgerStore>, seed: u64) {
    let engine = fixtures::engine(store, SeededEntropy::new(seed));
    let acct = fixtures::verified_with(&engine, "randy", dec!(500.00)).await;
    engine.set_daily_loss_limit(acct.id, Some(dec!(100000))).await.unwrap();
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..150 {
        let cents: i64 = rng.gen_range(10..5_000);
        let amount = Decimal::new(cents, 2);
        let result = match rng.gen_range(0..10) {
            0 => engine.record_deposit(acct.id, amount, "stripe").await.map(|_| ()),
            1 => engine
                .request_withdrawal(acct.id, amount, "paypal", AccountDetails::default())
                .await
                .map(|_| ()),
            n => {
                let game = [DOUBLE, SLOTS, ROULETTE][n % 3];
                engine.place_bet(acct.id, game, amount).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            assert_ne!(e.kind(), ErrorKind::Storage, "unexpected storage failure: {e}");
        }
        assert_reconciles(&engine, acct.id).await;
    }
}

#[tokio::test]
async fn test_conservation_memory() {
    random_activity(fixtures::memory(), 11).await;
}

#[tokio::test]
async fn test_conservation_sqlite() {
    random_activity(fixtures::sqlite().await, 12).await;
}

#[tokio::test]
async fn test_bet_then_win_scenario() {
    for store in [fixtures::memory(), fixtures::sqlite().await] {
        let engine = fixtures::engine(store, FixedEntropy::always_win());
        let acct = fixtures::verified_with(&engine, "winnie", dec!(100.00)).await;
        let before = engine.transactions(acct.id, 1, 100).await.unwrap().total;

        let out = engine.place_bet(acct.id, DOUBLE, dec!(10.00)).await.unwrap();
        assert_eq!(out.new_balance, dec!(110.00));
        assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(110.00));

        let page = engine.transactions(acct.id, 1, 100).await.unwrap();
        assert_eq!(page.total, before + 2);
        let win = &page.items[0];
        let bet = &page.items[1];
        assert_eq!((bet.kind, bet.amount), (TransactionKind::Bet, dec!(10.00)));
        assert_eq!((bet.balance_before, bet.balance_after), (dec!(100.00), dec!(90.00)));
        assert_eq!((win.kind, win.amount), (TransactionKind::Win, dec!(20.00)));
        assert_eq!((win.balance_before, win.balance_after), (dec!(90.00), dec!(110.00)));
        assert_reconciles(&engine, acct.id).await;
    }
}

#[tokio::test]
async fn test_fault_during_winning_bet_leaves_no_trace() {
    let mock = Arc::new(MockStore::new(fixtures::memory()));
    let engine = fixtures::engine(mock.clone(), FixedEntropy::always_win());
    let acct = fixtures::verified_with(&engine, "fay", dec!(100.00)).await;
    let entries = engine.transactions(acct.id, 1, 100).await.unwrap().total;

    mock.fail_winning_commits(true);
    let err = engine.place_bet(acct.id, DOUBLE, dec!(10.00)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    // Neither the debit nor the credit was persisted.
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
    assert_eq!(engine.transactions(acct.id, 1, 100).await.unwrap().total, entries);
    assert_eq!(engine.bets(acct.id, 1, 100).await.unwrap().total, 0);

    mock.fail_winning_commits(false);
    engine.place_bet(acct.id, DOUBLE, dec!(10.00)).await.unwrap();
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(110.00));
    assert_reconciles(&engine, acct.id).await;
}

#[tokio::test]
async fn test_storage_outage_rejects_everything() {
    let mock = Arc::new(MockStore::new(fixtures::memory()));
    let engine = fixtures::engine(mock.clone(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "otto", dec!(100.00)).await;

    mock.set_error("database is locked");
    assert!(engine.place_bet(acct.id, DOUBLE, dec!(5)).await.is_err());
    assert!(engine.record_deposit(acct.id, dec!(50), "stripe").await.is_err());
    assert!(engine
        .request_withdrawal(acct.id, dec!(50), "paypal", AccountDetails::default())
        .await
        .is_err());
    mock.clear_error();

    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
    engine.place_bet(acct.id, DOUBLE, dec!(5)).await.unwrap();
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(95.00));
}

#[tokio::test]
async fn test_balance_never_goes_negative() {
    let engine = fixtures::engine(fixtures::memory(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "nina", dec!(25.00)).await;

    for _ in 0..3 {
        engine.place_bet(acct.id, DOUBLE, dec!(7.00)).await.unwrap();
    }
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(4.00));

    let err = engine.place_bet(acct.id, DOUBLE, dec!(7.00)).await.unwrap_err();
    match err {
        LedgerError::InsufficientBalance { needed, available } => {
            assert_eq!(needed, dec!(7.00));
            assert_eq!(available, dec!(4.00));
        }
        other => panic!("unexpected error: {other}"),
    }
    engine.place_bet(acct.id, DOUBLE, dec!(4.00)).await.unwrap();
    assert_eq!(engine.balance(acct.id).await.unwrap(), Decimal::ZERO);
    assert_reconciles(&engine, acct.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_full_balance_bets() {
    for store in [fixtures::memory(), fixtures::sqlite().await] {
        let engine = Arc::new(fixtures::engine(store, FixedEntropy::always_lose()));
        let acct = fixtures::verified_with(&engine, "twin", dec!(100.00)).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.place_bet(acct.id, DOUBLE, dec!(100.00)).await })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientBalance { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(engine.balance(acct.id).await.unwrap(), Decimal::ZERO);
        assert_eq!(engine.bets(acct.id, 1, 10).await.unwrap().total, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_users_in_parallel() {
    let engine = Arc::new(fixtures::engine(fixtures::memory(), SeededEntropy::new(5)));
    let mut users = Vec::new();
    for i in 0..8 {
        users.push(fixtures::verified_with(&engine, &format!("player{i}"), dec!(200.00)).await);
    }

    let handles: Vec<_> = users
        .iter()
        .map(|u| {
            let engine = engine.clone();
            let id = u.id;
            tokio::spawn(async move {
                for _ in 0..20 {
                    let _ = engine.place_bet(id, SLOTS, dec!(2.50)).await;
                }
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }

    for u in &users {
        assert_reconciles(&engine, u.id).await;
    }
}

#[tokio::test]
async fn test_conflicts_are_retried() {
    let mock = Arc::new(MockStore::new(fixtures::memory()));
    let engine = fixtures::engine(mock.clone(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "remy", dec!(50.00)).await;
    let committed = mock.commits();

    mock.inject_conflicts(2);
    engine.place_bet(acct.id, DOUBLE, dec!(5)).await.unwrap();
    assert_eq!(mock.commits(), committed + 1);
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(45.00));

    // Default budget is 3 retries: four attempts in total.
    mock.inject_conflicts(10);
    let err = engine.place_bet(acct.id, DOUBLE, dec!(5)).await.unwrap_err();
    assert!(matches!(err, LedgerError::RetriesExhausted { attempts: 4 }));
    assert!(err.is_transient());
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(45.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_ledger_under_parallel_load() {
    let db = fixtures::TempDb::new();
    let engine = Arc::new(fixtures::engine(db.open(5).await, FixedEntropy::always_lose()));
    let mut users = Vec::new();
    for i in 0..16 {
        users.push(fixtures::verified_with(&engine, &format!("filer{i}"), dec!(100.00)).await);
    }

    let handles: Vec<_> = users
        .iter()
        .flat_map(|u| std::iter::repeat(u.id).take(20))
        .map(|id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.place_bet(id, DOUBLE, dec!(1.00)).await })
        })
        .collect();

    let mut failures = Vec::new();
    for h in handles {
        if let Err(e) = h.await.unwrap() {
            failures.push(e.to_string());
        }
    }
    assert!(failures.is_empty(), "{} bets refused, first: {:?}", failures.len(), failures.first());

    for u in &users {
        assert_eq!(engine.balance(u.id).await.unwrap(), dec!(80.00));
        assert_reconciles(&engine, u.id).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_engines_share_one_file() {
    let db = fixtures::TempDb::new();
    let mut config = fixtures::config();
    config.ledger.max_commit_retries = 50;
    let first = Arc::new(
        WageringEngine::new(&config, db.open(2).await).with_entropy(Arc::new(FixedEntropy::always_lose())),
    );
    let second = Arc::new(
        WageringEngine::new(&config, db.open(2).await).with_entropy(Arc::new(FixedEntropy::always_lose())),
    );
    let acct = fixtures::verified_with(&first, "shared", dec!(100.00)).await;

    // The engines do not share locks; only the stored version orders them.
    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|engine| {
            tokio::spawn(async move {
                for _ in 0..40 {
                    engine.place_bet(acct.id, DOUBLE, dec!(1.00)).await?;
                }
                Ok::<_, LedgerError>(())
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(second.balance(acct.id).await.unwrap(), dec!(20.00));
    assert_eq!(first.bets(acct.id, 1, 10).await.unwrap().total, 80);
    assert_reconciles(&first, acct.id).await;
}
