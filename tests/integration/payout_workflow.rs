//! Withdrawal reservation, completion and rejection end to end.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use wager_ledger::odds::entropy::FixedEntropy;
use wager_ledger::types::*;
use wager_ledger::WageringEngine;

use crate::fixtures;

fn paypal() -> AccountDetails {
    AccountDetails {
        email: Some("player@example.com".to_string()),
        ..AccountDetails::default()
    }
}

async fn entries_of(engine: &WageringEngine, user_id: Uuid, kind: TransactionKind) -> Vec<Transaction> {
    engine
        .transactions(user_id, 1, 100)
        .await
        .unwrap()
        .items
        .into_iter()
        .filter(|t| t.kind == kind)
        .collect()
}

#[tokio::test]
async fn test_reject_refunds_reservation() {
    let engine = fixtures::engine(fixtures::memory(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "rhea", dec!(100.00)).await;
    let admin = Uuid::new_v4();

    let payout = engine
        .request_withdrawal(acct.id, dec!(50.00), "paypal", paypal())
        .await
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(payout.fee, dec!(1.00));
    assert_eq!(payout.net_amount, dec!(49.00));
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(50.00));

    let rejected = engine.reject_payout(payout.id, admin, "name mismatch").await.unwrap();
    assert_eq!(rejected.status, PayoutStatus::Rejected);
    assert_eq!(rejected.admin_notes.as_deref(), Some("Rejected: name mismatch"));
    assert!(rejected.processed_date.is_some());
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));

    let refunds = entries_of(&engine, acct.id, TransactionKind::Adjustment).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, dec!(50.00));
    assert_eq!(refunds[0].signed_amount(), dec!(50.00));
    assert_eq!(refunds[0].related_id, Some(payout.id));
}

#[tokio::test]
async fn test_second_decision_is_refused() {
    let engine = fixtures::engine(fixtures::memory(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "saul", dec!(100.00)).await;
    let admin = Uuid::new_v4();
    let payout = engine
        .request_withdrawal(acct.id, dec!(40.00), "paypal", paypal())
        .await
        .unwrap();

    engine.reject_payout(payout.id, admin, "fraud check").await.unwrap();
    let err = engine.reject_payout(payout.id, admin, "again").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransition { from: PayoutStatus::Rejected, to: PayoutStatus::Rejected, .. }
    ));
    let err = engine.complete_payout(payout.id, admin, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    // Refunded exactly once.
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
    assert_eq!(entries_of(&engine, acct.id, TransactionKind::Adjustment).await.len(), 1);
}

#[tokio::test]
async fn test_completion_keeps_funds_out() {
    for store in [fixtures::memory(), fixtures::sqlite().await] {
        let engine = fixtures::engine(store, FixedEntropy::always_lose());
        let acct = fixtures::verified_with(&engine, "tess", dec!(300.00)).await;
        let admin = Uuid::new_v4();

        let payout = engine
            .request_withdrawal(acct.id, dec!(200.00), "paypal", paypal())
            .await
            .unwrap();
        assert_eq!(payout.fee, dec!(4.00));

        let done = engine
            .complete_payout(payout.id, admin, Some("sent".to_string()))
            .await
            .unwrap();
        assert_eq!(done.status, PayoutStatus::Completed);
        assert_eq!(done.admin_notes.as_deref(), Some("sent"));
        assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
        assert_eq!(engine.payout(payout.id).await.unwrap().status, PayoutStatus::Completed);

        let withdrawals = entries_of(&engine, acct.id, TransactionKind::Withdrawal).await;
        assert_eq!(withdrawals.len(), 2);
        let settled = withdrawals
            .iter()
            .find(|t| t.status == TransactionStatus::Settled)
            .unwrap();
        assert_eq!(settled.signed_amount(), Decimal::ZERO);
        assert_eq!(settled.balance_before, settled.balance_after);

        let rec = engine.verify_account(acct.id).await.unwrap();
        assert!(rec.is_consistent());
    }
}

#[tokio::test]
async fn test_withdrawal_preconditions() {
    let engine = fixtures::engine(fixtures::memory(), FixedEntropy::always_lose());
    let acct = fixtures::verified_with(&engine, "ugo", dec!(100.00)).await;

    assert!(matches!(
        engine.request_withdrawal(acct.id, dec!(10.00), "paypal", paypal()).await,
        Err(LedgerError::BelowMinimumWithdrawal { .. })
    ));
    assert!(matches!(
        engine.request_withdrawal(acct.id, dec!(150.00), "paypal", paypal()).await,
        Err(LedgerError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        engine.request_withdrawal(acct.id, dec!(50.00), "cheque", paypal()).await,
        Err(LedgerError::UnknownMethod(_))
    ));

    engine.set_kyc_verified(acct.id, false).await.unwrap();
    assert!(matches!(
        engine.request_withdrawal(acct.id, dec!(50.00), "paypal", paypal()).await,
        Err(LedgerError::KycRequired)
    ));
    assert!(engine.payouts(acct.id).await.unwrap().is_empty());
    assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_decisions_have_one_winner() {
    for store in [fixtures::memory(), fixtures::sqlite().await] {
        let engine = Arc::new(fixtures::engine(store, FixedEntropy::always_lose()));
        let acct = fixtures::verified_with(&engine, "vera", dec!(100.00)).await;
        let payout = engine
            .request_withdrawal(acct.id, dec!(60.00), "paypal", paypal())
            .await
            .unwrap();

        let reject = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reject_payout(payout.id, Uuid::new_v4(), "first").await })
        };
        let reject_again = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reject_payout(payout.id, Uuid::new_v4(), "second").await })
        };
        let complete = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.complete_payout(payout.id, Uuid::new_v4(), None).await })
        };

        let results = [
            reject.await.unwrap(),
            reject_again.await.unwrap(),
            complete.await.unwrap(),
        ];
        let winners: Vec<&Payout> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for r in &results {
            if let Err(e) = r {
                assert!(matches!(e, LedgerError::InvalidTransition { .. }), "unexpected error: {e}");
            }
        }

        let expected = match winners[0].status {
            PayoutStatus::Rejected => dec!(100.00),
            _ => dec!(40.00),
        };
        assert_eq!(engine.balance(acct.id).await.unwrap(), expected);
        assert!(engine.verify_account(acct.id).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_daily_withdrawal_cap_counts_reservations() {
    let mut config = fixtures::config();
    config.limits.daily_withdrawal_cap = dec!(100.00);
    let engine = WageringEngine::new(&config, fixtures::memory())
        .with_entropy(Arc::new(FixedEntropy::always_lose()));
    let acct = fixtures::verified_with(&engine, "wes", dec!(500.00)).await;

    engine.request_withdrawal(acct.id, dec!(70.00), "paypal", paypal()).await.unwrap();
    assert!(matches!(
        engine.request_withdrawal(acct.id, dec!(40.00), "paypal", paypal()).await,
        Err(LedgerError::DailyWithdrawalLimitExceeded { .. })
    ));
    engine.request_withdrawal(acct.id, dec!(30.00), "paypal", paypal()).await.unwrap();

    let payouts = engine.payouts(acct.id).await.unwrap();
    assert_eq!(payouts.len(), 2);
    assert_eq!(payouts[0].amount, dec!(30.00));
}

#[tokio::test]
async fn test_self_excluded_account_cannot_withdraw() {
    for store in [fixtures::memory(), fixtures::sqlite().await] {
        let engine = fixtures::engine(store, FixedEntropy::always_lose());
        let acct = fixtures::verified_with(&engine, "xena", dec!(100.00)).await;
        let excluded = engine.self_exclude(acct.id, 7).await.unwrap();
        let until = excluded.self_excluded_until.unwrap();

        let err = engine
            .request_withdrawal(acct.id, dec!(50.00), "paypal", paypal())
            .await
            .unwrap_err();
        match err {
            LedgerError::AccountExcluded { until: reported } => {
                assert_eq!(reported.timestamp(), until.timestamp())
            }
            other => panic!("unexpected error: {other}"),
        }
        // Exclusion is checked before the balance.
        assert!(matches!(
            engine.request_withdrawal(acct.id, dec!(500.00), "paypal", paypal()).await,
            Err(LedgerError::AccountExcluded { .. })
        ));

        assert_eq!(engine.balance(acct.id).await.unwrap(), dec!(100.00));
        assert!(engine.payouts(acct.id).await.unwrap().is_empty());
        assert!(entries_of(&engine, acct.id, TransactionKind::Withdrawal).await.is_empty());
    }
}
