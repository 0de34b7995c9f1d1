//! Bet settlement.
//!
//! Validates a wager, asks the odds engine for the outcome and commits the
//! debit, the bet record and any win credit as one batch.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{guard, WageringEngine};
use crate::audit::{AuditAction, AuditEvent};
use crate::storage::LedgerBatch;
use crate::types::{
    validate_amount, Bet, BetData, BetResult, GameId, LedgerError, Transaction, TransactionKind,
    TransactionStatus,
};

/// What the player sees after a settled bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetOutcome {
    pub bet: Bet,
    pub result: BetResult,
    pub win_amount: Decimal,
    pub multiplier: Decimal,
    pub new_balance: Decimal,
    /// The debit, then the win credit if any.
    pub transactions: Vec<Transaction>,
}

impl WageringEngine {
    /// Place and settle a bet in one step.
    ///
    /// Checks run in a fixed order against one snapshot: account state,
    /// game availability, table limits, personal limit, balance, daily loss.
    /// On any error nothing is written.
    pub async fn place_bet(
        &self,
        user_id: Uuid,
        game_id: GameId,
        amount: Decimal,
    ) -> Result<BetOutcome, LedgerError> {
        let outcome = self
            .serialized(user_id, "place_bet", || self.try_place_bet(user_id, game_id, amount))
            .await?;

        info!(
            user_id = %user_id,
            game_id,
            amount = %amount,
            result = %outcome.result,
            win = %outcome.win_amount,
            balance = %outcome.new_balance,
            "Bet settled"
        );
        self.emit(AuditEvent::new(
            AuditAction::GamePlay,
            user_id,
            user_id,
            format!(
                "Bet {:.2} on game #{game_id}: {} {:.2}",
                amount, outcome.result, outcome.win_amount
            ),
        ));
        if let Err(e) = self.catalog.record_play(game_id).await {
            warn!(game_id, error = %e, "Failed to record game play");
        }
        Ok(outcome)
    }

    async fn try_place_bet(
        &self,
        user_id: Uuid,
        game_id: GameId,
        amount: Decimal,
    ) -> Result<BetOutcome, LedgerError> {
        validate_amount(amount)?;
        let now = Utc::now();
        let account = self.load_account(user_id).await?;
        guard::ensure_can_play(&account, now)?;
        let game = self
            .catalog
            .game(game_id)
            .await?
            .ok_or(LedgerError::UnknownGame(game_id))?;

        guard::check_game_available(&game)?;
        guard::check_table_limits(&game, amount)?;
        guard::check_personal_limit(&account, amount)?;
        guard::check_balance(&account, amount)?;
        let today = self.store.bets_since(user_id, guard::start_of_day(now)).await?;
        guard::check_daily_loss(&account, &self.limits, guard::net_loss(&today), amount)?;

        let nonce = self.next_nonce();
        let outcome = {
            let mut rng = self.entropy.rng();
            self.odds.compute_outcome(&game, amount, rng.as_mut())?
        };

        let bet_id = Uuid::new_v4();
        let mut balance = account.balance;
        let mut transactions = vec![Transaction::post(
            user_id,
            TransactionKind::Bet,
            amount,
            TransactionStatus::Completed,
            &mut balance,
            format!("Bet on {}", game.title),
            Some(bet_id),
            now,
        )];
        let result = if outcome.is_win {
            BetResult::Win
        } else {
            BetResult::Loss
        };
        if outcome.win_amount > Decimal::ZERO {
            transactions.push(Transaction::post(
                user_id,
                TransactionKind::Win,
                outcome.win_amount,
                TransactionStatus::Completed,
                &mut balance,
                format!("Win on {} (x{})", game.title, outcome.multiplier),
                Some(bet_id),
                now,
            ));
        }

        let bet = Bet {
            id: bet_id,
            user_id,
            game_id,
            amount,
            multiplier: outcome.multiplier,
            result,
            win_amount: outcome.win_amount,
            timestamp: now,
            game_data: BetData {
                nonce,
                win_probability: outcome.win_probability,
                roll: outcome.roll,
            },
        };

        let mut next = account;
        next.balance = balance;
        let stored = self
            .store
            .commit(LedgerBatch {
                account: next,
                transactions: transactions.clone(),
                bet: Some(bet.clone()),
                payout: None,
            })
            .await?;

        Ok(BetOutcome {
            bet,
            result,
            win_amount: outcome.win_amount,
            multiplier: outcome.multiplier,
            new_balance: stored.balance,
            transactions,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
