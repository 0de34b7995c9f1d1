//! In-process ledger.
//!
//! Holds everything behind one mutex, so a batch is validated and applied
//! without interleaving. Nothing survives the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{counts_as_deposit, counts_as_withdrawn, LedgerBatch, LedgerStore, PayoutChange};
use crate::types::{Account, Bet, LedgerError, Page, Payout, Transaction};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    /// Commit order.
    transactions: Vec<Transaction>,
    transaction_ids: HashSet<Uuid>,
    references: HashSet<String>,
    bets: Vec<Bet>,
    payouts: Vec<Payout>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("memory ledger lock poisoned".to_string()))
    }
}

impl State {
    /// Every check that could fail, before anything is written.
    fn check(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        let stored = self
            .accounts
            .get(&batch.account.id)
            .ok_or(LedgerError::UnknownUser(batch.account.id))?;
        batch.validate(stored)?;

        let mut ids = HashSet::new();
        let mut refs = HashSet::new();
        for tx in &batch.transactions {
            let dup_id = !ids.insert(tx.id) || self.transaction_ids.contains(&tx.id);
            let dup_ref = !refs.insert(tx.reference.as_str()) || self.references.contains(&tx.reference);
            if dup_id || dup_ref {
                return Err(LedgerError::Storage(format!("duplicate transaction {}", tx.id)));
            }
        }

        if let Some(bet) = &batch.bet {
            if self.bets.iter().any(|b| b.id == bet.id) {
                return Err(LedgerError::Storage(format!("duplicate bet {}", bet.id)));
            }
        }

        match &batch.payout {
            Some(PayoutChange::Insert(p)) => {
                if self.payouts.iter().any(|q| q.id == p.id) {
                    return Err(LedgerError::Storage(format!("duplicate payout {}", p.id)));
                }
            }
            Some(PayoutChange::Update { payout, expected }) => {
                let current = self
                    .payouts
                    .iter()
                    .find(|q| q.id == payout.id)
                    .ok_or(LedgerError::UnknownPayout(payout.id))?;
                if current.status != *expected {
                    return Err(LedgerError::Conflict(format!(
                        "payout {} is {}, expected {}",
                        payout.id, current.status, expected
                    )));
                }
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if state.accounts.values().any(|a| a.username == account.username) {
            return Err(LedgerError::DuplicateUsername(account.username.clone()));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>, LedgerError> {
        Ok(self.state()?.accounts.get(&user_id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let mut all: Vec<Account> = self.state()?.accounts.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }

    async fn commit(&self, batch: LedgerBatch) -> Result<Account, LedgerError> {
        let mut state = self.state()?;
        state.check(&batch)?;

        let LedgerBatch { mut account, transactions, bet, payout } = batch;
        account.version += 1;
        debug!(
            user_id = %account.id,
            version = account.version,
            entries = transactions.len(),
            "Committing batch"
        );

        for tx in transactions {
            state.transaction_ids.insert(tx.id);
            state.references.insert(tx.reference.clone());
            state.transactions.push(tx);
        }
        if let Some(bet) = bet {
            state.bets.push(bet);
        }
        match payout {
            Some(PayoutChange::Insert(p)) => state.payouts.push(p),
            Some(PayoutChange::Update { payout, .. }) => {
                if let Some(slot) = state.payouts.iter_mut().find(|q| q.id == payout.id) {
                    *slot = payout;
                }
            }
            None => {}
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn payout(&self, payout_id: Uuid) -> Result<Option<Payout>, LedgerError> {
        Ok(self.state()?.payouts.iter().find(|p| p.id == payout_id).cloned())
    }

    async fn payouts(&self, user_id: Uuid) -> Result<Vec<Payout>, LedgerError> {
        Ok(self
            .state()?
            .payouts
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Transaction>, LedgerError> {
        let newest_first: Vec<Transaction> = self
            .state()?
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        Ok(Page::from_sorted(newest_first, page, per_page))
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .state()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn bets(&self, user_id: Uuid, page: u32, per_page: u32) -> Result<Page<Bet>, LedgerError> {
        let newest_first: Vec<Bet> = self
            .state()?
            .bets
            .iter()
            .rev()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        Ok(Page::from_sorted(newest_first, page, per_page))
    }

    async fn bets_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Bet>, LedgerError> {
        Ok(self
            .state()?
            .bets
            .iter()
            .filter(|b| b.user_id == user_id && b.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn deposits_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .state()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && counts_as_deposit(t, since))
            .map(|t| t.amount)
            .sum())
    }

    async fn withdrawn_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal, LedgerError> {
        Ok(self
            .state()?
            .payouts
            .iter()
            .filter(|p| p.user_id == user_id && counts_as_withdrawn(p, since))
            .map(|p| p.amount)
            .sum())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
