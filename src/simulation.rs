//! Return-to-player simulation.
//!
//! Replays many flat-stake rounds of a game through the odds engine without
//! touching the ledger, and reports how the observed return compares with
//! the configured RTP. Used by the operator binary as a configuration
//! sanity check and by tests.

use rand::Rng;
use rust_decimal::prelude::*;

use crate::odds::OddsEngine;
use crate::types::{Game, GameId, LedgerError};

/// Outcome statistics for one simulated game.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub game_id: GameId,
    pub title: String,
    pub rounds: u64,
    pub stake: Decimal,
    pub wagered: Decimal,
    pub returned: Decimal,
    pub wins: u64,
    /// Configured RTP as a fraction.
    pub target_rtp: f64,
    /// `returned / wagered`.
    pub observed_rtp: f64,
    pub hit_rate: f64,
    pub max_multiplier: Decimal,
    pub longest_losing_streak: u64,
}

impl SimulationReport {
    /// Observed minus target, in RTP points (0.01 = one percentage point).
    pub fn deviation(&self) -> f64 {
        self.observed_rtp - self.target_rtp
    }

    pub fn within(&self, tolerance: f64) -> bool {
        self.deviation().abs() <= tolerance
    }
}

pub struct Simulator {
    odds: OddsEngine,
}

impl Simulator {
    pub fn new(odds: OddsEngine) -> Self {
        Self { odds }
    }

    /// Play `rounds` bets of `stake` on `game`.
    pub fn run<R: Rng + ?Sized>(
        &self,
        game: &Game,
        rounds: u64,
        stake: Decimal,
        rng: &mut R,
    ) -> Result<SimulationReport, LedgerError> {
        let mut returned = Decimal::ZERO;
        let mut wins = 0u64;
        let mut max_multiplier = Decimal::ZERO;
        let mut streak = 0u64;
        let mut longest_losing_streak = 0u64;

        for _ in 0..rounds {
            let outcome = self.odds.compute_outcome(game, stake, rng)?;
            returned += outcome.win_amount;
            if outcome.is_win {
                wins += 1;
                streak = 0;
                max_multiplier = max_multiplier.max(outcome.multiplier);
            } else {
                streak += 1;
                longest_losing_streak = longest_losing_streak.max(streak);
            }
        }

        let wagered = stake * Decimal::from(rounds);
        let observed_rtp = if wagered.is_zero() {
            0.0
        } else {
            (returned / wagered).to_f64().unwrap_or(0.0)
        };
        let hit_rate = if rounds == 0 { 0.0 } else { wins as f64 / rounds as f64 };

        Ok(SimulationReport {
            game_id: game.id,
            title: game.title.clone(),
            rounds,
            stake,
            wagered,
            returned,
            wins,
            target_rtp: game.rtp.to_f64().unwrap_or(0.0) / 100.0,
            observed_rtp,
            hit_rate,
            max_multiplier,
            longest_losing_streak,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
