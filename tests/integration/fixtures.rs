//! Shared engine and game setup.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use wager_ledger::config::{AppConfig, PaymentMethodConfig};
use wager_ledger::odds::entropy::EntropySource;
use wager_ledger::storage::{LedgerStore, MemoryLedger, SqliteLedger};
use wager_ledger::types::{Account, Game, GameCategory, GameId, PaytableEntry, Volatility};
use wager_ledger::WageringEngine;

/// Pays exactly 2× on a win.
pub const DOUBLE: GameId = 1;
pub const SLOTS: GameId = 2;
pub const ROULETTE: GameId = 3;

pub fn games() -> Vec<Game> {
    vec![
        Game {
            id: DOUBLE,
            title: "Double or Nothing".to_string(),
            category: GameCategory::Other("coinflip".to_string()),
            min_bet: dec!(1),
            max_bet: dec!(1000),
            rtp: dec!(96.5),
            volatility: Volatility::Medium,
            active: true,
            maintenance: false,
            paytable: Some(vec![PaytableEntry::new(dec!(2), 1.0)]),
        },
        Game {
            id: SLOTS,
            title: "Starburst Reels".to_string(),
            category: GameCategory::Slots,
            min_bet: dec!(0.10),
            max_bet: dec!(100),
            rtp: dec!(96.0),
            volatility: Volatility::High,
            active: true,
            maintenance: false,
            paytable: None,
        },
        Game {
            id: ROULETTE,
            title: "European Roulette".to_string(),
            category: GameCategory::Roulette,
            min_bet: dec!(1),
            max_bet: dec!(500),
            rtp: dec!(97.3),
            volatility: Volatility::Medium,
            active: true,
            maintenance: false,
            paytable: None,
        },
    ]
}

pub fn config() -> AppConfig {
    let mut cfg = AppConfig::with_defaults();
    cfg.games = games();
    cfg.payment_methods.insert(
        "bank".to_string(),
        PaymentMethodConfig {
            name: "Bank transfer".to_string(),
            min: dec!(1),
            max: dec!(100000),
            fee_percent: Decimal::ZERO,
        },
    );
    cfg
}

pub fn engine(store: Arc<dyn LedgerStore>, entropy: impl EntropySource + 'static) -> WageringEngine {
    WageringEngine::new(&config(), store).with_entropy(Arc::new(entropy))
}

pub fn memory() -> Arc<dyn LedgerStore> {
    Arc::new(MemoryLedger::new())
}

pub async fn sqlite() -> Arc<dyn LedgerStore> {
    Arc::new(SqliteLedger::in_memory().await.unwrap())
}

/// A database file under the temp dir, removed (with its WAL files) on drop.
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("wager_ledger_it_{}.db", Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }

    /// A separate pool on the same file, as another process would have.
    pub async fn open(&self, max_connections: u32) -> Arc<dyn LedgerStore> {
        Arc::new(SqliteLedger::connect(&self.url(), max_connections).await.unwrap())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

/// Open a verified account funded through the fee-free `bank` method.
pub async fn verified_with(engine: &WageringEngine, name: &str, amount: Decimal) -> Account {
    let acct = engine.open_account(name).await.unwrap();
    engine.set_kyc_verified(acct.id, true).await.unwrap();
    if amount > Decimal::ZERO {
        engine.set_daily_deposit_limit(acct.id, Some(amount.max(dec!(1000)))).await.unwrap();
        engine.record_deposit(acct.id, amount, "bank").await.unwrap();
    }
    engine.account(acct.id).await.unwrap()
}
