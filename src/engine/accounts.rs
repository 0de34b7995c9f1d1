//! Account lifecycle, responsible-gambling settings and read accessors.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::WageringEngine;
use crate::storage::LedgerBatch;
use crate::types::{validate_amount, Account, Bet, Game, LedgerError, Page, Payout, Transaction};

/// Result of replaying a user's ledger against the stored balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub user_id: Uuid,
    pub balance: Decimal,
    /// Σ signed amounts over every entry.
    pub ledger_total: Decimal,
    pub entries: usize,
    /// Entries whose `balance_before` does not follow the previous entry or
    /// whose delta disagrees with their amount.
    pub broken_entries: Vec<Uuid>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_total && self.broken_entries.is_empty()
    }
}

impl WageringEngine {
    // -- Lifecycle ----------------------------------------------------------

    /// Create an unverified account with zero balance.
    pub async fn open_account(&self, username: &str) -> Result<Account, LedgerError> {
        let account = Account::new(username.trim());
        self.store.insert_account(&account).await?;
        info!(user_id = %account.id, username = %account.username, "Account opened");
        Ok(account)
    }

    /// Feed from the KYC reviewer.
    pub async fn set_kyc_verified(&self, user_id: Uuid, verified: bool) -> Result<Account, LedgerError> {
        self.update_account(user_id, "set_kyc_verified", |a| {
            a.kyc_verified = verified;
            Ok(())
        })
        .await
    }

    /// Per-wager cap, clamped into the configured floor/ceiling. `None` clears it.
    /// An inverted floor/ceiling pair resolves to the ceiling.
    pub async fn set_bet_limit(&self, user_id: Uuid, limit: Option<Decimal>) -> Result<Account, LedgerError> {
        let floor = self.limits.bet_limit_floor;
        let ceiling = self.limits.bet_limit_ceiling;
        let limit = limit.map(|l| l.max(floor).min(ceiling));
        self.update_account(user_id, "set_bet_limit", |a| {
            a.bet_limit = limit;
            Ok(())
        })
        .await
    }

    /// `None` restores the house default.
    pub async fn set_daily_loss_limit(&self, user_id: Uuid, limit: Option<Decimal>) -> Result<Account, LedgerError> {
        if let Some(l) = limit {
            validate_amount(l)?;
        }
        self.update_account(user_id, "set_daily_loss_limit", |a| {
            a.daily_loss_limit = limit;
            Ok(())
        })
        .await
    }

    /// `None` restores the house default.
    pub async fn set_daily_deposit_limit(&self, user_id: Uuid, limit: Option<Decimal>) -> Result<Account, LedgerError> {
        if let Some(l) = limit {
            validate_amount(l)?;
        }
        self.update_account(user_id, "set_daily_deposit_limit", |a| {
            a.daily_deposit_limit = limit;
            Ok(())
        })
        .await
    }

    /// Block wagering and withdrawals for `days`. An exclusion already in
    /// force is never shortened.
    pub async fn self_exclude(&self, user_id: Uuid, days: u32) -> Result<Account, LedgerError> {
        if !self.limits.exclusion_periods_days.contains(&days) {
            return Err(LedgerError::InvalidExclusionPeriod(days));
        }
        let until = Utc::now() + Duration::days(days as i64);
        let account = self
            .update_account(user_id, "self_exclude", |a| {
                a.self_excluded_until = Some(a.self_excluded_until.map_or(until, |cur| cur.max(until)));
                Ok(())
            })
            .await?;
        info!(user_id = %user_id, days, until = %until, "Self-exclusion set");
        Ok(account)
    }

    /// Close the account. History stays; money movement stops.
    pub async fn archive_account(&self, user_id: Uuid) -> Result<Account, LedgerError> {
        let account = self
            .update_account(user_id, "archive_account", |a| {
                a.archived_at.get_or_insert_with(Utc::now);
                Ok(())
            })
            .await?;
        info!(user_id = %user_id, balance = %account.balance, "Account archived");
        Ok(account)
    }

    /// Versioned settings change with no ledger entries.
    async fn update_account<F>(&self, user_id: Uuid, op: &'static str, change: F) -> Result<Account, LedgerError>
    where
        F: Fn(&mut Account) -> Result<(), LedgerError>,
    {
        let change = &change;
        self.serialized(user_id, op, move || async move {
            let mut account = self.load_account(user_id).await?;
            change(&mut account)?;
            self.store.commit(LedgerBatch::account_only(account)).await
        })
        .await
    }

    // -- Reads --------------------------------------------------------------

    pub async fn account(&self, user_id: Uuid) -> Result<Account, LedgerError> {
        self.load_account(user_id).await
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal, LedgerError> {
        Ok(self.load_account(user_id).await?.balance)
    }

    /// Newest first; `page` is 1-based.
    pub async fn transactions(&self, user_id: Uuid, page: u32, per_page: u32) -> Result<Page<Transaction>, LedgerError> {
        self.load_account(user_id).await?;
        self.store.transactions(user_id, page, per_page).await
    }

    /// Newest first; `page` is 1-based.
    pub async fn bets(&self, user_id: Uuid, page: u32, per_page: u32) -> Result<Page<Bet>, LedgerError> {
        self.load_account(user_id).await?;
        self.store.bets(user_id, page, per_page).await
    }

    /// Newest first.
    pub async fn payouts(&self, user_id: Uuid) -> Result<Vec<Payout>, LedgerError> {
        self.load_account(user_id).await?;
        self.store.payouts(user_id).await
    }

    pub async fn payout(&self, payout_id: Uuid) -> Result<Payout, LedgerError> {
        self.store
            .payout(payout_id)
            .await?
            .ok_or(LedgerError::UnknownPayout(payout_id))
    }

    /// Games currently open for wagering.
    pub async fn available_games(&self) -> Result<Vec<Game>, LedgerError> {
        Ok(self
            .catalog
            .games()
            .await?
            .into_iter()
            .filter(Game::is_available)
            .collect())
    }

    /// Replay the user's ledger and compare it with the stored balance.
    pub async fn verify_account(&self, user_id: Uuid) -> Result<Reconciliation, LedgerError> {
        let account = self.load_account(user_id).await?;
        let entries = self.store.ledger(user_id).await?;

        let mut running = Decimal::ZERO;
        let mut broken_entries = Vec::new();
        for tx in &entries {
            if tx.balance_before != running || !tx.is_consistent() {
                broken_entries.push(tx.id);
            }
            running = tx.balance_after;
        }

        Ok(Reconciliation {
            user_id,
            balance: account.balance,
            ledger_total: entries.iter().map(Transaction::signed_amount).sum(),
            entries: entries.len(),
            broken_entries,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
