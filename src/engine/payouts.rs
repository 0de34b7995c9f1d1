//! Withdrawal workflow.
//!
//! A withdrawal request reserves the funds immediately (balance debit plus
//! a `Processing` payout). An admin later completes it, which only records
//! the settlement, or rejects it, which credits the reserved amount back.
//! Status updates are committed against the status they were decided from,
//! so two admins racing on one payout cannot both win.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use super::{guard, WageringEngine};
use crate::audit::{AuditAction, AuditEvent};
use crate::storage::{LedgerBatch, PayoutChange};
use crate::types::{
    validate_amount, AccountDetails, LedgerError, Payout, PayoutStatus, Transaction,
    TransactionKind, TransactionStatus,
};

impl WageringEngine {
    /// Reserve `amount` for payout through `method`.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
        account_details: AccountDetails,
    ) -> Result<Payout, LedgerError> {
        let payout = self
            .serialized(user_id, "request_withdrawal", || {
                self.try_request_withdrawal(user_id, amount, method, &account_details)
            })
            .await?;

        info!(
            user_id = %user_id,
            payout_id = %payout.id,
            amount = %payout.amount,
            fee = %payout.fee,
            method,
            "Withdrawal requested"
        );
        self.emit(AuditEvent::new(
            AuditAction::WithdrawalRequest,
            user_id,
            user_id,
            format!("Withdrawal of {:.2} via {method} requested", payout.amount),
        ));
        Ok(payout)
    }

    async fn try_request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
        account_details: &AccountDetails,
    ) -> Result<Payout, LedgerError> {
        validate_amount(amount)?;
        let now = Utc::now();
        let account = self.load_account(user_id).await?;
        guard::ensure_can_play(&account, now)?;
        self.payment_method(method)?;
        guard::check_min_withdrawal(&self.limits, amount)?;
        guard::check_balance(&account, amount)?;
        guard::check_kyc(&account)?;
        let withdrawn = self.store.withdrawn_since(user_id, guard::start_of_day(now)).await?;
        guard::check_daily_withdrawal(&self.limits, withdrawn, amount)?;

        let fee = guard::withdrawal_fee(&self.limits, amount);
        let payout = Payout {
            id: Uuid::new_v4(),
            user_id,
            amount,
            method: method.to_string(),
            status: PayoutStatus::Processing,
            fee,
            net_amount: amount - fee,
            account_details: account_details.clone(),
            request_date: now,
            processed_date: None,
            admin_notes: None,
        };

        let mut balance = account.balance;
        let reservation = Transaction::post(
            user_id,
            TransactionKind::Withdrawal,
            amount,
            TransactionStatus::Processing,
            &mut balance,
            format!("Withdrawal via {method}"),
            Some(payout.id),
            now,
        );
        let mut next = account;
        next.balance = balance;
        self.store
            .commit(LedgerBatch {
                account: next,
                transactions: vec![reservation],
                bet: None,
                payout: Some(PayoutChange::Insert(payout.clone())),
            })
            .await?;
        Ok(payout)
    }

    /// Mark a processing payout as paid out. Moves no funds.
    pub async fn complete_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        let owner = self.payout(payout_id).await?.user_id;
        let payout = self
            .serialized(owner, "complete_payout", || {
                self.try_decide(payout_id, PayoutStatus::Completed, notes.clone())
            })
            .await?;

        info!(payout_id = %payout_id, admin_id = %admin_id, user_id = %owner, "Payout completed");
        self.emit(AuditEvent::new(
            AuditAction::PayoutComplete,
            admin_id,
            owner,
            format!("Payout of {:.2} completed", payout.amount),
        ));
        Ok(payout)
    }

    /// Refuse a payout and credit the reserved amount back.
    pub async fn reject_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<Payout, LedgerError> {
        let owner = self.payout(payout_id).await?.user_id;
        let notes = format!("Rejected: {reason}");
        let payout = self
            .serialized(owner, "reject_payout", || {
                self.try_decide(payout_id, PayoutStatus::Rejected, Some(notes.clone()))
            })
            .await?;

        info!(
            payout_id = %payout_id,
            admin_id = %admin_id,
            user_id = %owner,
            refunded = %payout.amount,
            reason,
            "Payout rejected"
        );
        self.emit(AuditEvent::new(
            AuditAction::PayoutReject,
            admin_id,
            owner,
            format!("Payout of {:.2} rejected: {reason}", payout.amount),
        ));
        Ok(payout)
    }

    async fn try_decide(
        &self,
        payout_id: Uuid,
        to: PayoutStatus,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        let current = self.payout(payout_id).await?;
        if !current.status.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                payout_id,
                from: current.status,
                to,
            });
        }

        let now = Utc::now();
        let account = self.load_account(current.user_id).await?;
        let mut balance = account.balance;
        let entry = match to {
            PayoutStatus::Completed => Transaction::post(
                account.id,
                TransactionKind::Withdrawal,
                current.amount,
                TransactionStatus::Settled,
                &mut balance,
                format!("Payout completed via {}", current.method),
                Some(payout_id),
                now,
            ),
            _ => Transaction::post(
                account.id,
                TransactionKind::Adjustment,
                current.amount,
                TransactionStatus::Completed,
                &mut balance,
                format!("Refund of rejected withdrawal via {}", current.method),
                Some(payout_id),
                now,
            ),
        };

        let mut decided = current.clone();
        decided.status = to;
        decided.processed_date = Some(now);
        if notes.is_some() {
            decided.admin_notes = notes;
        }

        let mut next = account;
        next.balance = balance;
        self.store
            .commit(LedgerBatch {
                account: next,
                transactions: vec![entry],
                bet: None,
                payout: Some(PayoutChange::Update {
                    payout: decided.clone(),
                    expected: current.status,
                }),
            })
            .await?;
        Ok(decided)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
