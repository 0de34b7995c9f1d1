//! Random sources for the odds engine.
//!
//! Every outcome gets a fresh generator from an `EntropySource`, so no RNG
//! state is shared between concurrent bets. Production uses `OsEntropy`;
//! tests inject seeded or fixed sources for reproducible outcomes.

use rand::rngs::mock::StepRng;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};

pub trait EntropySource: Send + Sync {
    /// A generator for exactly one outcome computation.
    fn rng(&self) -> Box<dyn RngCore + Send>;
}

/// ChaCha-based `StdRng` freshly seeded from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn rng(&self) -> Box<dyn RngCore + Send> {
        Box::new(StdRng::from_entropy())
    }
}

/// Deterministic stream: call `n` is seeded with `seed + n`.
#[derive(Debug)]
pub struct SeededEntropy {
    seed: u64,
    calls: AtomicU64,
}

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            calls: AtomicU64::new(0),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn rng(&self) -> Box<dyn RngCore + Send> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        Box::new(StdRng::seed_from_u64(self.seed.wrapping_add(n)))
    }
}

/// Constant output, for forcing an outcome.
#[derive(Debug, Clone)]
pub struct FixedEntropy {
    rng: StepRng,
}

impl FixedEntropy {
    /// Every draw is 0.0: the roll is always below the win probability and
    /// the first paytable row is always chosen.
    pub fn always_win() -> Self {
        Self { rng: StepRng::new(0, 0) }
    }

    /// Every draw is just under 1.0: the roll never beats the probability
    /// ceiling.
    pub fn always_lose() -> Self {
        Self { rng: StepRng::new(u64::MAX, 0) }
    }
}

impl EntropySource for FixedEntropy {
    fn rng(&self) -> Box<dyn RngCore + Send> {
        Box::new(self.rng.clone())
    }
}
