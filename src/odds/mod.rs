//! Odds engine: pure outcome computation.
//!
//! Given a game and a stake, decides win/loss and the payout multiplier.
//! Holds no state beyond its configuration; randomness is always passed in
//! so the same engine serves production (OS-seeded CSPRNG) and tests
//! (seeded or fixed generators).

pub mod entropy;
pub mod paytable;

use rand::Rng;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::OddsConfig;
use crate::types::{round_money, Game, LedgerError};
use paytable::Paytable;

/// Result of one outcome computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub is_win: bool,
    /// Zero on a loss.
    pub multiplier: Decimal,
    /// `round(stake × multiplier, 2)`; zero on a loss.
    pub win_amount: Decimal,
    /// Probability the roll was compared against.
    pub win_probability: f64,
    pub roll: f64,
}

#[derive(Debug, Clone)]
pub struct OddsEngine {
    config: OddsConfig,
}

impl Default for OddsEngine {
    fn default() -> Self {
        Self::new(OddsConfig::default())
    }
}

impl OddsEngine {
    pub fn new(config: OddsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OddsConfig {
        &self.config
    }

    /// Decide the outcome of a single wager.
    ///
    /// Draw order is fixed (jitter, roll, then multiplier on a win) so a
    /// seeded generator always reproduces the same outcome.
    ///
    /// The base hit probability depends on [`OddsConfig::calibrate_to_rtp`].
    /// When set (the default) it is `rtp / 100` divided by the paytable's
    /// expected multiplier, so the long-run return matches the advertised
    /// RTP. When cleared it is `rtp / 100` itself. Either way it is then
    /// jittered and clamped to the configured probability bounds.
    pub fn compute_outcome<R: Rng + ?Sized>(
        &self,
        game: &Game,
        bet_amount: Decimal,
        rng: &mut R,
    ) -> Result<Outcome, LedgerError> {
        let paytable = Paytable::for_game(game, self.config.max_multiplier).ok_or_else(|| {
            LedgerError::GameUnavailable {
                game_id: game.id,
                reason: "no usable paytable".to_string(),
            }
        })?;

        let jitter_unit: f64 = rng.gen();
        let win_probability = self.win_probability(game, &paytable, jitter_unit);
        let roll: f64 = rng.gen();

        if roll < win_probability {
            let multiplier = paytable.draw(rng);
            Ok(Outcome {
                is_win: true,
                multiplier,
                win_amount: round_money(bet_amount * multiplier),
                win_probability,
                roll,
            })
        } else {
            Ok(Outcome {
                is_win: false,
                multiplier: Decimal::ZERO,
                win_amount: Decimal::ZERO,
                win_probability,
                roll,
            })
        }
    }

    /// Hit probability after calibration, jitter and clamping.
    fn win_probability(&self, game: &Game, paytable: &Paytable, jitter_unit: f64) -> f64 {
        let rtp = game.rtp.to_f64().unwrap_or(0.0).clamp(0.0, 100.0) / 100.0;
        let base = if self.config.calibrate_to_rtp {
            let expected = paytable.expected_multiplier();
            if expected > 0.0 {
                rtp / expected
            } else {
                rtp
            }
        } else {
            rtp
        };
        let jitter =
            self.config.jitter_low + (self.config.jitter_high - self.config.jitter_low) * jitter_unit;
        (base * jitter).clamp(self.config.min_probability, self.config.max_probability)
    }
}
