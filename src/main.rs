//! Wager Ledger operator binary.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the durable ledger, checks every configured game's payout model against
//! its RTP by simulation and reconciles every stored account.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{error, info, warn};

use wager_ledger::config::AppConfig;
use wager_ledger::odds::OddsEngine;
use wager_ledger::simulation::{SimulationReport, Simulator};
use wager_ledger::storage::SqliteLedger;
use wager_ledger::WageringEngine;

const DEFAULT_CONFIG: &str = "config.toml";
const DEFAULT_SIM_ROUNDS: u64 = 100_000;
/// Observed RTP further than this from the target is logged as a warning.
const RTP_TOLERANCE: f64 = 0.03;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::resolve_env("WAGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();
    info!(
        config = %config_path,
        games = cfg.games.len(),
        payment_methods = cfg.payment_methods.len(),
        database = %cfg.ledger.database_url,
        "Wager ledger starting up"
    );

    // -- Ledger ------------------------------------------------------------

    let store = Arc::new(
        SqliteLedger::open(&cfg.ledger)
            .await
            .context("Failed to open ledger database")?,
    );
    let engine = WageringEngine::new(&cfg, store.clone());

    let available = engine.available_games().await?;
    info!(available = available.len(), total = cfg.games.len(), "Game catalog loaded");

    // -- RTP simulation ------------------------------------------------------

    let rounds = AppConfig::resolve_env("WAGER_SIM_ROUNDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SIM_ROUNDS);

    let jobs = cfg.games.iter().cloned().map(|game| {
        let odds = OddsEngine::new(cfg.odds.clone());
        tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::from_entropy();
            Simulator::new(odds).run(&game, rounds, dec!(1), &mut rng)
        })
    });
    for report in try_join_all(jobs).await.context("Simulation task panicked")? {
        match report {
            Ok(report) => log_simulation(&report),
            Err(e) => error!(error = %e, "Simulation failed"),
        }
    }

    // -- Reconciliation -------------------------------------------------------

    let accounts = engine.store().accounts().await?;
    let checks = try_join_all(accounts.iter().map(|a| engine.verify_account(a.id))).await?;
    let mut broken = 0usize;
    for rec in &checks {
        if rec.is_consistent() {
            info!(user_id = %rec.user_id, balance = %rec.balance, entries = rec.entries, "Account reconciled");
        } else {
            broken += 1;
            error!(
                user_id = %rec.user_id,
                balance = %rec.balance,
                ledger_total = %rec.ledger_total,
                broken_entries = rec.broken_entries.len(),
                "Account does not reconcile"
            );
        }
    }

    store.close().await;
    info!(accounts = checks.len(), broken, "Wager ledger shut down cleanly.");
    Ok(())
}

/// Log one game's simulated return.
fn log_simulation(report: &SimulationReport) {
    if report.within(RTP_TOLERANCE) {
        info!(
            game_id = report.game_id,
            title = %report.title,
            rounds = report.rounds,
            target = format!("{:.2}%", report.target_rtp * 100.0),
            observed = format!("{:.2}%", report.observed_rtp * 100.0),
            hit_rate = format!("{:.1}%", report.hit_rate * 100.0),
            max_multiplier = %report.max_multiplier,
            longest_losing_streak = report.longest_losing_streak,
            "RTP simulation"
        );
    } else {
        warn!(
            game_id = report.game_id,
            title = %report.title,
            target = format!("{:.2}%", report.target_rtp * 100.0),
            observed = format!("{:.2}%", report.observed_rtp * 100.0),
            "Observed RTP outside tolerance"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wager_ledger=info,audit=info"));

    let json_logging = std::env::var("WAGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
