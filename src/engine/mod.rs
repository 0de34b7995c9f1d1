//! Wagering engine: the only component that moves money.
//!
//! `WageringEngine` ties the ledger store, odds engine, game catalog and
//! audit sink together. Every mutating operation follows the same shape:
//! take the user's lock, read a fresh snapshot, run the guard checks,
//! build one `LedgerBatch`, commit it. A version conflict re-runs the whole
//! attempt; audit events and popularity bumps happen only after a commit.

pub mod accounts;
pub mod cashier;
pub mod guard;
pub mod locks;
pub mod payouts;
pub mod settlement;

pub use accounts::Reconciliation;
pub use settlement::BetOutcome;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::catalog::{ConfigCatalog, GameCatalog};
use crate::config::{AppConfig, LimitsConfig, PaymentMethodConfig};
use crate::odds::entropy::{EntropySource, OsEntropy};
use crate::odds::OddsEngine;
use crate::storage::LedgerStore;
use crate::types::{Account, ErrorKind, LedgerError};
use locks::UserLocks;

pub struct WageringEngine {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn GameCatalog>,
    audit: Arc<dyn AuditSink>,
    entropy: Arc<dyn EntropySource>,
    odds: OddsEngine,
    limits: LimitsConfig,
    payment_methods: BTreeMap<String, PaymentMethodConfig>,
    max_commit_retries: u32,
    locks: UserLocks,
    nonce: AtomicU64,
}

impl WageringEngine {
    /// Engine over `store` with the configured games, tracing audit sink
    /// and OS entropy. Swap collaborators with the `with_*` methods.
    pub fn new(config: &AppConfig, store: Arc<dyn LedgerStore>) -> Self {
        let payment_methods = if config.payment_methods.is_empty() {
            AppConfig::default_payment_methods()
        } else {
            config.payment_methods.clone()
        };
        Self {
            store,
            catalog: Arc::new(ConfigCatalog::new(config.games.clone())),
            audit: Arc::new(TracingAuditSink),
            entropy: Arc::new(OsEntropy),
            odds: OddsEngine::new(config.odds.clone()),
            limits: config.limits.clone(),
            payment_methods,
            max_commit_retries: config.ledger.max_commit_retries,
            locks: UserLocks::new(),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn GameCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Current snapshot or `UnknownUser`.
    pub(crate) async fn load_account(&self, user_id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .account(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))
    }

    /// Run `attempt` under the user's lock, re-running it after version
    /// conflicts. `attempt` must re-read everything it depends on.
    pub(crate) async fn serialized<T, F, Fut>(
        &self,
        user_id: Uuid,
        op: &'static str,
        mut attempt: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let _guard = self.locks.acquire(user_id).await;
        let attempts = self.max_commit_retries.saturating_add(1);
        for n in 1..=attempts {
            match attempt().await {
                Err(LedgerError::Conflict(reason)) => {
                    debug!(op, user_id = %user_id, attempt = n, %reason, "Version conflict, retrying");
                }
                Err(e) => {
                    log_rejection(op, user_id, &e);
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
        warn!(op, user_id = %user_id, attempts, "Giving up after repeated conflicts");
        Err(LedgerError::RetriesExhausted { attempts })
    }

    pub(crate) fn emit(&self, event: AuditEvent) {
        self.audit.emit(event);
    }

    pub(crate) fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn payment_method(&self, method: &str) -> Result<&PaymentMethodConfig, LedgerError> {
        self.payment_methods
            .get(method)
            .ok_or_else(|| LedgerError::UnknownMethod(method.to_string()))
    }
}

fn log_rejection(op: &str, user_id: Uuid, err: &LedgerError) {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::Policy => {
            warn!(op, user_id = %user_id, error = %err, "Operation rejected");
        }
        ErrorKind::Consistency | ErrorKind::Storage => {
            error!(op, user_id = %user_id, error = %err, "Operation failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
