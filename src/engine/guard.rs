//! Limit & eligibility checks.
//!
//! Pure functions over an account snapshot and ledger aggregates. Each
//! check returns the specific `LedgerError` a caller should see; the
//! operations decide the order in which they run.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::config::{LimitsConfig, PaymentMethodConfig};
use crate::types::{round_money, Account, Bet, Game, LedgerError};

/// Midnight UTC of the day containing `now`. Daily limits reset here.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Archived accounts accept no money movement.
pub fn ensure_not_archived(account: &Account) -> Result<(), LedgerError> {
    if account.is_archived() {
        return Err(LedgerError::AccountClosed(account.id));
    }
    Ok(())
}

/// Open and not self-excluded. Runs before every bet and withdrawal check.
pub fn ensure_can_play(account: &Account, now: DateTime<Utc>) -> Result<(), LedgerError> {
    ensure_not_archived(account)?;
    match account.self_excluded_until {
        Some(until) if until > now => Err(LedgerError::AccountExcluded { until }),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

pub fn check_game_available(game: &Game) -> Result<(), LedgerError> {
    if !game.active {
        return Err(LedgerError::GameUnavailable {
            game_id: game.id,
            reason: "inactive".to_string(),
        });
    }
    if game.maintenance {
        return Err(LedgerError::GameUnavailable {
            game_id: game.id,
            reason: "under maintenance".to_string(),
        });
    }
    Ok(())
}

pub fn check_table_limits(game: &Game, amount: Decimal) -> Result<(), LedgerError> {
    if amount < game.min_bet || amount > game.max_bet {
        return Err(LedgerError::BetOutOfRange {
            amount,
            min: game.min_bet,
            max: game.max_bet,
        });
    }
    Ok(())
}

pub fn check_personal_limit(account: &Account, amount: Decimal) -> Result<(), LedgerError> {
    match account.bet_limit {
        Some(limit) if amount > limit => Err(LedgerError::PersonalLimitExceeded { amount, limit }),
        _ => Ok(()),
    }
}

pub fn check_balance(account: &Account, amount: Decimal) -> Result<(), LedgerError> {
    if amount > account.balance {
        return Err(LedgerError::InsufficientBalance {
            needed: amount,
            available: account.balance,
        });
    }
    Ok(())
}

/// Net loss over the given bets: stakes minus winnings. Wins reduce it.
pub fn net_loss(bets: &[Bet]) -> Decimal {
    bets.iter().map(Bet::net_loss).sum()
}

pub fn check_daily_loss(
    account: &Account,
    limits: &LimitsConfig,
    lost_today: Decimal,
    amount: Decimal,
) -> Result<(), LedgerError> {
    let limit = account.daily_loss_limit.unwrap_or(limits.default_daily_loss_limit);
    if lost_today + amount > limit {
        return Err(LedgerError::DailyLimitExceeded { lost_today, amount, limit });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

pub fn check_method_range(method: &PaymentMethodConfig, amount: Decimal) -> Result<(), LedgerError> {
    if amount < method.min || amount > method.max {
        return Err(LedgerError::AmountOutOfRange {
            amount,
            min: method.min,
            max: method.max,
        });
    }
    Ok(())
}

pub fn check_daily_deposit(
    account: &Account,
    limits: &LimitsConfig,
    deposited_today: Decimal,
    amount: Decimal,
) -> Result<(), LedgerError> {
    let limit = account.daily_deposit_limit.unwrap_or(limits.default_daily_deposit_limit);
    if deposited_today + amount > limit {
        return Err(LedgerError::DailyDepositLimitExceeded { deposited_today, limit });
    }
    Ok(())
}

/// Unverified users may deposit up to the KYC threshold in total.
pub fn check_deposit_kyc(
    account: &Account,
    limits: &LimitsConfig,
    deposited_total: Decimal,
    amount: Decimal,
) -> Result<(), LedgerError> {
    if !account.kyc_verified && deposited_total + amount > limits.kyc_deposit_threshold {
        return Err(LedgerError::KycRequired);
    }
    Ok(())
}

/// `round(amount × fee_percent / 100)`; zero for fee-free methods.
pub fn deposit_fee(method: &PaymentMethodConfig, amount: Decimal) -> Decimal {
    round_money(amount * method.fee_percent / Decimal::ONE_HUNDRED)
}

// ---------------------------------------------------------------------------
// Withdrawals
// ---------------------------------------------------------------------------

pub fn check_min_withdrawal(limits: &LimitsConfig, amount: Decimal) -> Result<(), LedgerError> {
    if amount < limits.min_withdrawal {
        return Err(LedgerError::BelowMinimumWithdrawal {
            amount,
            minimum: limits.min_withdrawal,
        });
    }
    Ok(())
}

pub fn check_kyc(account: &Account) -> Result<(), LedgerError> {
    if !account.kyc_verified {
        return Err(LedgerError::KycRequired);
    }
    Ok(())
}

pub fn check_daily_withdrawal(
    limits: &LimitsConfig,
    withdrawn_today: Decimal,
    amount: Decimal,
) -> Result<(), LedgerError> {
    if withdrawn_today + amount > limits.daily_withdrawal_cap {
        return Err(LedgerError::DailyWithdrawalLimitExceeded {
            withdrawn_today,
            limit: limits.daily_withdrawal_cap,
        });
    }
    Ok(())
}

/// `max(minimum, amount × rate)` rounded to cents.
pub fn withdrawal_fee(limits: &LimitsConfig, amount: Decimal) -> Decimal {
    round_money((amount * limits.withdrawal_fee_rate).max(limits.withdrawal_fee_minimum))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
