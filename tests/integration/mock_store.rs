//! Fault-injecting ledger store for integration testing.
//!
//! Wraps a real `LedgerStore` and forwards every call, except that commits
//! can be made to fail on demand: always, only for batches carrying a win
//! credit, or with a fixed number of version conflicts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use wager_ledger::storage::{LedgerBatch, LedgerStore};
use wager_ledger::types::*;

pub struct MockStore {
    inner: Arc<dyn LedgerStore>,
    /// If set, every commit fails with this storage error.
    force_error: Arc<Mutex<Option<String>>>,
    /// Fail commits that contain a `Win` entry.
    fail_wins: Arc<Mutex<bool>>,
    /// Remaining commits to refuse with a version conflict.
    conflicts: Arc<Mutex<u32>>,
    commits: Arc<Mutex<u32>>,
}

impl MockStore {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            force_error: Arc::new(Mutex::new(None)),
            fail_wins: Arc::new(Mutex::new(false)),
            conflicts: Arc::new(Mutex::new(0)),
            commits: Arc::new(Mutex::new(0)),
        }
    }

    /// Force all subsequent commits to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn fail_winning_commits(&self, on: bool) {
        *self.fail_wins.lock().unwrap() = on;
    }

    /// Refuse the next `n` commits as stale.
    pub fn inject_conflicts(&self, n: u32) {
        *self.conflicts.lock().unwrap() = n;
    }

    /// Commits that reached the inner store.
    pub fn commits(&self) -> u32 {
        *self.commits.lock().unwrap()
    }
}

#[async_trait]
impl LedgerStore for MockStore {
    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        self.inner.insert_account(account).await
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>, LedgerError> {
        self.inner.account(user_id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.inner.accounts().await
    }

    async fn commit(&self, batch: LedgerBatch) -> Result<Account, LedgerError> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(LedgerError::Storage(err.clone()));
        }
        {
            let mut remaining = self.conflicts.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::Conflict("injected".to_string()));
            }
        }
        let has_win = batch.transactions.iter().any(|t| t.kind == TransactionKind::Win);
        if has_win && *self.fail_wins.lock().unwrap() {
            return Err(LedgerError::Storage("disk full while crediting win".to_string()));
        }
        let stored = self.inner.commit(batch).await?;
        *self.commits.lock().unwrap() += 1;
        Ok(stored)
    }

    async fn payout(&self, payout_id: Uuid) -> Result<Option<Payout>, LedgerError> {
        self.inner.payout(payout_id).await
    }

    async fn payouts(&self, user_id: Uuid) -> Result<Vec<Payout>, LedgerError> {
        self.inner.payouts(user_id).await
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Transaction>, LedgerError> {
        self.inner.transactions(user_id, page, per_page).await
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.ledger(user_id).await
    }

    async fn bets(&self, user_id: Uuid, page: u32, per_page: u32) -> Result<Page<Bet>, LedgerError> {
        self.inner.bets(user_id, page, per_page).await
    }

    async fn bets_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Bet>, LedgerError> {
        self.inner.bets_since(user_id, since).await
    }

    async fn deposits_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, LedgerError> {
        self.inner.deposits_since(user_id, since).await
    }

    async fn withdrawn_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal, LedgerError> {
        self.inner.withdrawn_since(user_id, since).await
    }
}
