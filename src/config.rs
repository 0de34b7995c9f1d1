//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults matching the platform's house rules, so a partial
//! file (or none of a section) is valid. `DATABASE_URL` overrides the
//! ledger location when set.

use anyhow::{ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

use crate::types::Game;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub limits: LimitsConfig,
    pub odds: OddsConfig,
    pub payment_methods: BTreeMap<String, PaymentMethodConfig>,
    pub games: Vec<Game>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// sqlx connection string, e.g. `sqlite://ledger.db?mode=rwc`.
    pub database_url: String,
    pub max_connections: u32,
    /// How many times a whole operation is re-run after a version conflict.
    pub max_commit_retries: u32,
    /// How long a connection waits on another writer's lock before SQLite
    /// reports the database busy.
    pub busy_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ledger.db?mode=rwc".to_string(),
            max_connections: 5,
            max_commit_retries: 3,
            busy_timeout_ms: 5_000,
        }
    }
}

/// House limits consulted by the guard and the payout workflow.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_withdrawal: Decimal,
    pub daily_withdrawal_cap: Decimal,
    pub withdrawal_fee_rate: Decimal,
    pub withdrawal_fee_minimum: Decimal,
    /// Cumulative deposits above this require KYC.
    pub kyc_deposit_threshold: Decimal,
    pub default_daily_loss_limit: Decimal,
    pub default_daily_deposit_limit: Decimal,
    /// Personal bet limits are clamped into `[bet_limit_floor, bet_limit_ceiling]`.
    pub bet_limit_floor: Decimal,
    pub bet_limit_ceiling: Decimal,
    /// Allowed self-exclusion periods in days.
    pub exclusion_periods_days: Vec<u32>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_withdrawal: dec!(20.00),
            daily_withdrawal_cap: dec!(10000.00),
            withdrawal_fee_rate: dec!(0.02),
            withdrawal_fee_minimum: dec!(1.00),
            kyc_deposit_threshold: dec!(1000.00),
            default_daily_loss_limit: dec!(1000.00),
            default_daily_deposit_limit: dec!(1000.00),
            bet_limit_floor: dec!(1),
            bet_limit_ceiling: dec!(10000),
            exclusion_periods_days: vec![1, 7, 30, 90, 180, 365],
        }
    }
}

/// Odds engine tuning.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OddsConfig {
    pub max_multiplier: Decimal,
    pub jitter_low: f64,
    pub jitter_high: f64,
    pub min_probability: f64,
    pub max_probability: f64,
    /// Scale hit probability by the paytable's expected multiplier so the
    /// long-run return matches the configured RTP.
    pub calibrate_to_rtp: bool,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            max_multiplier: dec!(10000),
            jitter_low: 0.95,
            jitter_high: 1.05,
            min_probability: 0.05,
            max_probability: 0.95,
            calibrate_to_rtp: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PaymentMethodConfig {
    pub name: String,
    pub min: Decimal,
    pub max: Decimal,
    pub fee_percent: Decimal,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        if let Ok(url) = Self::resolve_env("DATABASE_URL") {
            config.ledger.database_url = url;
        }
        config.fill_default_methods();
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {path}"))?;
        Ok(config)
    }

    /// Reject ranges that are empty or inverted.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        ensure!(
            limits.bet_limit_floor <= limits.bet_limit_ceiling,
            "bet_limit_floor {} exceeds bet_limit_ceiling {}",
            limits.bet_limit_floor,
            limits.bet_limit_ceiling
        );
        ensure!(
            !limits.exclusion_periods_days.is_empty(),
            "exclusion_periods_days is empty"
        );

        let odds = &self.odds;
        ensure!(
            (0.0..=1.0).contains(&odds.min_probability)
                && (0.0..=1.0).contains(&odds.max_probability)
                && odds.min_probability <= odds.max_probability,
            "probability bounds [{}, {}] are not a range within [0, 1]",
            odds.min_probability,
            odds.max_probability
        );
        ensure!(
            odds.jitter_low > 0.0 && odds.jitter_low <= odds.jitter_high,
            "jitter bounds [{}, {}] are not a positive range",
            odds.jitter_low,
            odds.jitter_high
        );
        ensure!(odds.max_multiplier > Decimal::ZERO, "max_multiplier must be positive");

        for (id, method) in &self.payment_methods {
            ensure!(
                method.min <= method.max,
                "payment method {id}: min {} exceeds max {}",
                method.min,
                method.max
            );
        }
        for game in &self.games {
            ensure!(
                game.min_bet <= game.max_bet,
                "game {}: min_bet {} exceeds max_bet {}",
                game.id,
                game.min_bet,
                game.max_bet
            );
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Built-in payment methods when the file configures none.
    pub fn default_payment_methods() -> BTreeMap<String, PaymentMethodConfig> {
        let mut methods = BTreeMap::new();
        methods.insert(
            "stripe".to_string(),
            PaymentMethodConfig { name: "Credit Card".into(), min: dec!(5), max: dec!(5000), fee_percent: dec!(2.5) },
        );
        methods.insert(
            "paypal".to_string(),
            PaymentMethodConfig { name: "PayPal".into(), min: dec!(10), max: dec!(3000), fee_percent: dec!(3.0) },
        );
        methods.insert(
            "crypto".to_string(),
            PaymentMethodConfig { name: "Cryptocurrency".into(), min: dec!(20), max: dec!(10000), fee_percent: dec!(1.0) },
        );
        methods
    }

    fn fill_default_methods(&mut self) {
        if self.payment_methods.is_empty() {
            self.payment_methods = Self::default_payment_methods();
        }
    }

    /// Defaults plus the built-in payment methods; what tests and embedders
    /// start from.
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        config.fill_default_methods();
        config
    }
}
