//! Game catalog.
//!
//! Game configuration is owned outside the ledger; the engine only reads it
//! and bumps a popularity counter after each settled bet. `ConfigCatalog`
//! serves the `[[games]]` table from `config.toml`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::types::{Game, GameId, LedgerError};

#[async_trait]
pub trait GameCatalog: Send + Sync {
    async fn game(&self, id: GameId) -> Result<Option<Game>, LedgerError>;

    /// Every configured game, available or not.
    async fn games(&self) -> Result<Vec<Game>, LedgerError>;

    /// Bump the popularity counter. Callers treat failure as non-fatal.
    async fn record_play(&self, id: GameId) -> Result<(), LedgerError>;
}

struct Entry {
    game: Game,
    plays: AtomicU64,
}

/// Static catalog built from configuration.
pub struct ConfigCatalog {
    games: BTreeMap<GameId, Entry>,
}

impl ConfigCatalog {
    pub fn new(games: impl IntoIterator<Item = Game>) -> Self {
        let mut map = BTreeMap::new();
        for game in games {
            if map.contains_key(&game.id) {
                warn!(game_id = game.id, title = %game.title, "Duplicate game id, keeping the first");
                continue;
            }
            map.insert(game.id, Entry { game, plays: AtomicU64::new(0) });
        }
        Self { games: map }
    }

    /// Plays recorded since startup.
    pub fn popularity(&self, id: GameId) -> Option<u64> {
        self.games.get(&id).map(|e| e.plays.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl GameCatalog for ConfigCatalog {
    async fn game(&self, id: GameId) -> Result<Option<Game>, LedgerError> {
        Ok(self.games.get(&id).map(|e| e.game.clone()))
    }

    async fn games(&self) -> Result<Vec<Game>, LedgerError> {
        Ok(self.games.values().map(|e| e.game.clone()).collect())
    }

    async fn record_play(&self, id: GameId) -> Result<(), LedgerError> {
        let entry = self.games.get(&id).ok_or(LedgerError::UnknownGame(id))?;
        entry.plays.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
