//! Deposits.
//!
//! Deposits settle instantly as internal credits. When the payment method
//! charges a fee, the fee is debited in the same batch so the ledger shows
//! both the gross credit and the charge.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use super::{guard, WageringEngine};
use crate::audit::{AuditAction, AuditEvent};
use crate::config::PaymentMethodConfig;
use crate::storage::LedgerBatch;
use crate::types::{validate_amount, LedgerError, Transaction, TransactionKind, TransactionStatus};

impl WageringEngine {
    /// Configured payment methods keyed by id (`stripe`, `paypal`, ...).
    pub fn payment_methods(&self) -> &BTreeMap<String, PaymentMethodConfig> {
        &self.payment_methods
    }

    /// Credit a deposit and return its ledger entry.
    pub async fn record_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<Transaction, LedgerError> {
        let (deposit, fee) = self
            .serialized(user_id, "record_deposit", || self.try_record_deposit(user_id, amount, method))
            .await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            fee = %fee,
            method,
            balance = %(deposit.balance_after - fee),
            "Deposit recorded"
        );
        self.emit(AuditEvent::new(
            AuditAction::Deposit,
            user_id,
            user_id,
            format!("Deposit of {amount:.2} via {method}"),
        ));
        Ok(deposit)
    }

    async fn try_record_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<(Transaction, Decimal), LedgerError> {
        validate_amount(amount)?;
        let now = Utc::now();
        let account = self.load_account(user_id).await?;
        guard::ensure_not_archived(&account)?;
        let config = self.payment_method(method)?;
        guard::check_method_range(config, amount)?;

        let today = self.store.deposits_since(user_id, Some(guard::start_of_day(now))).await?;
        guard::check_daily_deposit(&account, &self.limits, today, amount)?;
        let lifetime = self.store.deposits_since(user_id, None).await?;
        guard::check_deposit_kyc(&account, &self.limits, lifetime, amount)?;

        let mut balance = account.balance;
        let deposit = Transaction::post(
            user_id,
            TransactionKind::Deposit,
            amount,
            TransactionStatus::Completed,
            &mut balance,
            format!("Deposit via {}", config.name),
            None,
            now,
        );
        let fee = guard::deposit_fee(config, amount);
        let mut transactions = vec![deposit.clone()];
        if fee > Decimal::ZERO {
            transactions.push(Transaction::post(
                user_id,
                TransactionKind::Fee,
                fee,
                TransactionStatus::Completed,
                &mut balance,
                format!("{} fee ({}%)", config.name, config.fee_percent),
                Some(deposit.id),
                now,
            ));
        }

        let mut next = account;
        next.balance = balance;
        self.store
            .commit(LedgerBatch {
                account: next,
                transactions,
                bet: None,
                payout: None,
            })
            .await?;
        Ok((deposit, fee))
    }
}
