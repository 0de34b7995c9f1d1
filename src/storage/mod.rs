//! Persistence layer.
//!
//! The ledger is the single source of truth for balances. Every mutation is
//! handed to a `LedgerStore` as one `LedgerBatch` and is applied entirely or
//! not at all. Batches carry the account version they were computed from;
//! a store refuses a batch whose version is stale with `LedgerError::Conflict`.
//!
//! Two implementations: `MemoryLedger` for tests and embedding, and
//! `SqliteLedger` for durable storage via sqlx.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{
    Account, Bet, LedgerError, Page, Payout, PayoutStatus, Transaction, TransactionKind,
    TransactionStatus,
};

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

/// Payout write carried by a batch.
#[derive(Debug, Clone)]
pub enum PayoutChange {
    Insert(Payout),
    /// Apply only if the stored status still equals `expected`.
    Update { payout: Payout, expected: PayoutStatus },
}

impl PayoutChange {
    pub fn payout(&self) -> &Payout {
        match self {
            PayoutChange::Insert(p) => p,
            PayoutChange::Update { payout, .. } => payout,
        }
    }
}

/// Everything one operation writes, committed atomically.
///
/// `account` is the desired post-commit state; its `version` must equal the
/// stored version; the store bumps it on success.
#[derive(Debug, Clone)]
pub struct LedgerBatch {
    pub account: Account,
    pub transactions: Vec<Transaction>,
    pub bet: Option<Bet>,
    pub payout: Option<PayoutChange>,
}

impl LedgerBatch {
    /// A batch that only changes account settings.
    pub fn account_only(account: Account) -> Self {
        Self {
            account,
            transactions: Vec::new(),
            bet: None,
            payout: None,
        }
    }

    /// Structural checks every store runs before writing.
    ///
    /// The transactions must form a contiguous chain starting at the stored
    /// balance and ending at the new one, so conservation holds by
    /// construction.
    pub fn validate(&self, stored: &Account) -> Result<(), LedgerError> {
        if stored.version != self.account.version {
            return Err(LedgerError::Conflict(format!(
                "account {} at version {}, batch computed from {}",
                stored.id, stored.version, self.account.version
            )));
        }

        let mut running = stored.balance;
        for tx in &self.transactions {
            if tx.user_id != stored.id {
                return Err(LedgerError::Storage(format!(
                    "transaction {} belongs to another account",
                    tx.id
                )));
            }
            if tx.balance_before != running || !tx.is_consistent() {
                return Err(LedgerError::Storage(format!(
                    "transaction {} breaks the balance chain",
                    tx.id
                )));
            }
            running = tx.balance_after;
        }
        if running != self.account.balance {
            return Err(LedgerError::Storage(format!(
                "unbalanced batch for {}: entries end at {running}, account says {}",
                stored.id, self.account.balance
            )));
        }
        if self.account.balance < Decimal::ZERO {
            return Err(LedgerError::Storage(format!(
                "batch would leave {} with a negative balance",
                stored.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a fresh account. Fails with `DuplicateUsername` on a taken name.
    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError>;

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>, LedgerError>;

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError>;

    /// Apply a batch atomically and return the account as stored.
    async fn commit(&self, batch: LedgerBatch) -> Result<Account, LedgerError>;

    async fn payout(&self, payout_id: Uuid) -> Result<Option<Payout>, LedgerError>;

    /// Newest first.
    async fn payouts(&self, user_id: Uuid) -> Result<Vec<Payout>, LedgerError>;

    /// Newest first.
    async fn transactions(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Transaction>, LedgerError>;

    /// Every entry for the user in commit order.
    async fn ledger(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError>;

    /// Newest first.
    async fn bets(&self, user_id: Uuid, page: u32, per_page: u32)
        -> Result<Page<Bet>, LedgerError>;

    /// Bets placed at or after `since`.
    async fn bets_since(&self, user_id: Uuid, since: DateTime<Utc>)
        -> Result<Vec<Bet>, LedgerError>;

    /// Completed deposit credits, optionally only those at or after `since`.
    async fn deposits_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, LedgerError>;

    /// Gross amount of payouts requested at or after `since` that are
    /// processing or completed.
    async fn withdrawn_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn counts_as_deposit(tx: &Transaction, since: Option<DateTime<Utc>>) -> bool {
    tx.kind == TransactionKind::Deposit
        && tx.status == TransactionStatus::Completed
        && since.map_or(true, |s| tx.timestamp >= s)
}

pub(crate) fn counts_as_withdrawn(payout: &Payout, since: DateTime<Utc>) -> bool {
    matches!(payout.status, PayoutStatus::Processing | PayoutStatus::Completed)
        && payout.request_date >= since
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
