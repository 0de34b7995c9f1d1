//! Weighted multiplier tables.
//!
//! Each game category pays out from a discrete distribution of
//! multipliers. Slots vary by volatility; roulette approximates European
//! true odds; blackjack pays a flat 3:2; poker pays by hand strength.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::types::{Game, GameCategory, PaytableEntry, Volatility};

/// A validated, capped multiplier distribution.
#[derive(Debug, Clone)]
pub struct Paytable {
    entries: Vec<PaytableEntry>,
    index: WeightedIndex<f64>,
}

impl Paytable {
    /// Build from raw entries, capping every multiplier at `cap`.
    /// Returns `None` for empty tables or unusable weights.
    pub fn new(entries: Vec<PaytableEntry>, cap: Decimal) -> Option<Self> {
        let entries: Vec<PaytableEntry> = entries
            .into_iter()
            .map(|e| PaytableEntry::new(e.multiplier.min(cap), e.weight))
            .collect();
        if entries.iter().any(|e| e.multiplier <= Decimal::ZERO) {
            return None;
        }
        let index = WeightedIndex::new(entries.iter().map(|e| e.weight)).ok()?;
        Some(Self { entries, index })
    }

    /// The table a game pays from: its override if usable, else its
    /// category's. `None` only when the cap itself is unusable.
    pub fn for_game(game: &Game, cap: Decimal) -> Option<Self> {
        if let Some(custom) = &game.paytable {
            if let Some(table) = Self::new(custom.clone(), cap) {
                return Some(table);
            }
            warn!(game_id = game.id, "Unusable paytable override, using category table");
        }
        Self::new(category_table(&game.category, game.volatility), cap)
    }

    /// Draw a multiplier.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Decimal {
        self.entries[self.index.sample(rng)].multiplier
    }

    /// Weight-normalised mean multiplier.
    pub fn expected_multiplier(&self) -> f64 {
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        let weighted: f64 = self
            .entries
            .iter()
            .map(|e| e.multiplier.to_f64().unwrap_or(0.0) * e.weight)
            .sum();
        weighted / total
    }

    pub fn entries(&self) -> &[PaytableEntry] {
        &self.entries
    }
}

/// Built-in table for a category.
pub fn category_table(category: &GameCategory, volatility: Volatility) -> Vec<PaytableEntry> {
    let rows: Vec<(Decimal, f64)> = match category {
        GameCategory::Slots => match volatility {
            Volatility::Low => vec![
                (dec!(1.2), 0.40),
                (dec!(1.5), 0.30),
                (dec!(2), 0.20),
                (dec!(3), 0.10),
            ],
            Volatility::Medium => vec![
                (dec!(1.5), 0.35),
                (dec!(2), 0.30),
                (dec!(3), 0.20),
                (dec!(5), 0.10),
                (dec!(10), 0.05),
            ],
            Volatility::High => vec![
                (dec!(1.5), 0.30),
                (dec!(2), 0.25),
                (dec!(3), 0.20),
                (dec!(5), 0.12),
                (dec!(10), 0.08),
                (dec!(20), 0.05),
            ],
        },
        GameCategory::Roulette => vec![
            (dec!(1.1), 0.4865),
            (dec!(2), 0.3243),
            (dec!(3), 0.1622),
            (dec!(8), 0.0811),
            (dec!(11), 0.0541),
            (dec!(17), 0.027),
            (dec!(35), 0.027),
        ],
        GameCategory::Blackjack => vec![(dec!(1.5), 1.0)],
        // pair, two pair, trips, straight, flush, full house, quads,
        // straight flush, royal flush
        GameCategory::Poker => vec![
            (dec!(1.5), 0.45),
            (dec!(2), 0.25),
            (dec!(3), 0.15),
            (dec!(5), 0.08),
            (dec!(8), 0.04),
            (dec!(12), 0.02),
            (dec!(25), 0.008),
            (dec!(50), 0.0015),
            (dec!(250), 0.0005),
        ],
        GameCategory::Other(_) => vec![
            (dec!(1.5), 0.25),
            (dec!(2), 0.25),
            (dec!(3), 0.25),
            (dec!(5), 0.25),
        ],
    };
    rows.into_iter().map(|(m, w)| PaytableEntry::new(m, w)).collect()
}
