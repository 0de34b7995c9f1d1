//! Shared types for the wagering ledger.
//!
//! These types form the data model used across all modules: accounts,
//! immutable ledger transactions, bets, game configuration, payouts and
//! the domain error taxonomy. Storage, odds and engine modules all depend
//! on this file and nothing here depends on them.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Game identifiers come from configuration (`[[games]] id = 7`).
pub type GameId = u32;

// ---------------------------------------------------------------------------
// Money helpers
// ---------------------------------------------------------------------------

/// Round to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Reject zero, negative, or sub-cent amounts before anything else runs.
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > 2 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// Unique human-readable reference: `PREFIX_YYYYMMDDHHMMSS_XXXXXX`.
pub fn generate_reference(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_uppercase())
        .take(6)
        .collect();
    format!("{prefix}_{}_{suffix}", at.format("%Y%m%d%H%M%S"))
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// The ledger's view of a user.
///
/// `version` is bumped by the store on every commit that touches the
/// account; commits computed from a stale snapshot are refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    /// Authoritative current funds.
    pub balance: Decimal,
    /// Optional per-user cap on a single wager.
    pub bet_limit: Option<Decimal>,
    /// Falls back to `limits.default_daily_loss_limit` when unset.
    pub daily_loss_limit: Option<Decimal>,
    /// Falls back to `limits.default_daily_deposit_limit` when unset.
    pub daily_deposit_limit: Option<Decimal>,
    pub kyc_verified: bool,
    pub self_excluded_until: Option<DateTime<Utc>>,
    /// Archived accounts keep their history but accept no money movement.
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) balance={:.2} kyc={} v{}",
            self.username, self.id, self.balance, self.kyc_verified, self.version,
        )
    }
}

impl Account {
    /// A fresh, unverified account with zero balance.
    pub fn new(username: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            balance: Decimal::ZERO,
            bet_limit: None,
            daily_loss_limit: None,
            daily_deposit_limit: None,
            kyc_verified: false,
            self_excluded_until: None,
            archived_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Whether a self-exclusion is in force at `now`.
    pub fn is_excluded(&self, now: DateTime<Utc>) -> bool {
        self.self_excluded_until.map_or(false, |until| until > now)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Bet,
    Win,
    Withdrawal,
    Bonus,
    Fee,
    Adjustment,
}

impl TransactionKind {
    /// Credits add to the balance; everything else debits.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionKind::Deposit
                | TransactionKind::Win
                | TransactionKind::Bonus
                | TransactionKind::Adjustment
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Bet => "bet",
            TransactionKind::Win => "win",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Bonus => "bonus",
            TransactionKind::Fee => "fee",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// Prefix used in transaction references.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEP",
            TransactionKind::Bet => "BET",
            TransactionKind::Win => "WIN",
            TransactionKind::Withdrawal => "WDR",
            TransactionKind::Bonus => "BON",
            TransactionKind::Fee => "FEE",
            TransactionKind::Adjustment => "ADJ",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "bet" => Ok(TransactionKind::Bet),
            "win" => Ok(TransactionKind::Win),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "bonus" => Ok(TransactionKind::Bonus),
            "fee" => Ok(TransactionKind::Fee),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(LedgerError::Storage(format!("unknown transaction kind: {other}"))),
        }
    }
}

/// Lifecycle marker of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    /// Funds moved, external settlement outstanding (withdrawal reservations).
    Processing,
    /// Confirms settlement of an earlier reservation. Moves no funds.
    Settled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Settled => "settled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "processing" => Ok(TransactionStatus::Processing),
            "settled" => Ok(TransactionStatus::Settled),
            other => Err(LedgerError::Storage(format!("unknown transaction status: {other}"))),
        }
    }
}

/// Immutable ledger entry. Never updated or deleted once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    /// Always a positive magnitude; direction comes from `kind`.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub reference: String,
    pub description: String,
    /// The bet or payout this entry belongs to, if any.
    pub related_id: Option<Uuid>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signed = self.signed_amount();
        let sign = if signed >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "[{}] {} {sign}{:.2} ({:.2} → {:.2}) {} [{}]",
            self.reference,
            self.kind,
            signed,
            self.balance_before,
            self.balance_after,
            self.status,
            self.description,
        )
    }
}

impl Transaction {
    /// Build the next entry against a running balance and advance it.
    ///
    /// Batches are assembled by threading one `balance` through successive
    /// calls, so each entry's `balance_before` is the previous entry's
    /// `balance_after`.
    pub fn post(
        user_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        status: TransactionStatus,
        balance: &mut Decimal,
        description: impl Into<String>,
        related_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            balance_before: *balance,
            balance_after: *balance,
            status,
            timestamp: at,
            reference: generate_reference(kind.reference_prefix(), at),
            description: description.into(),
            related_id,
        };
        tx.balance_after = tx.balance_before + tx.signed_amount();
        *balance = tx.balance_after;
        tx
    }

    /// Effect of this entry on the balance.
    pub fn signed_amount(&self) -> Decimal {
        if self.status == TransactionStatus::Settled {
            Decimal::ZERO
        } else if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }

    /// `balance_after - balance_before == signed_amount()`.
    pub fn is_consistent(&self) -> bool {
        self.balance_after - self.balance_before == self.signed_amount()
    }
}

// ---------------------------------------------------------------------------
// Games
// ---------------------------------------------------------------------------

/// Game family; selects the multiplier table on a win.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GameCategory {
    Slots,
    Roulette,
    Blackjack,
    Poker,
    Other(String),
}

impl From<String> for GameCategory {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "slots" | "slot" => GameCategory::Slots,
            "roulette" => GameCategory::Roulette,
            "blackjack" => GameCategory::Blackjack,
            "poker" => GameCategory::Poker,
            _ => GameCategory::Other(s),
        }
    }
}

impl From<GameCategory> for String {
    fn from(c: GameCategory) -> Self {
        c.to_string()
    }
}

impl fmt::Display for GameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameCategory::Slots => write!(f, "slots"),
            GameCategory::Roulette => write!(f, "roulette"),
            GameCategory::Blackjack => write!(f, "blackjack"),
            GameCategory::Poker => write!(f, "poker"),
            GameCategory::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Variance profile of a game's payout distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Low,
    #[default]
    Medium,
    High,
}

/// One row of a weighted multiplier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaytableEntry {
    pub multiplier: Decimal,
    pub weight: f64,
}

impl PaytableEntry {
    pub fn new(multiplier: Decimal, weight: f64) -> Self {
        Self { multiplier, weight }
    }
}

fn default_true() -> bool {
    true
}

/// Game configuration. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub title: String,
    pub category: GameCategory,
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    /// Return to player, 0–100.
    pub rtp: Decimal,
    #[serde(default)]
    pub volatility: Volatility,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub maintenance: bool,
    /// Replaces the category table when present.
    #[serde(default)]
    pub paytable: Option<Vec<PaytableEntry>>,
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{} / {:?}] bet {:.2}–{:.2} rtp={}%",
            self.id, self.title, self.category, self.volatility, self.min_bet, self.max_bet, self.rtp,
        )
    }
}

impl Game {
    /// Open for wagering: active and not under maintenance.
    pub fn is_available(&self) -> bool {
        self.active && !self.maintenance
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetResult {
    Win,
    Loss,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Win => "win",
            BetResult::Loss => "loss",
        }
    }
}

impl fmt::Display for BetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetResult {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(BetResult::Win),
            "loss" => Ok(BetResult::Loss),
            other => Err(LedgerError::Storage(format!("unknown bet result: {other}"))),
        }
    }
}

/// Audit data captured with every bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetData {
    pub nonce: u64,
    /// Probability after jitter and clamping.
    pub win_probability: f64,
    /// The uniform draw compared against `win_probability`.
    pub roll: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub game_id: GameId,
    pub amount: Decimal,
    pub multiplier: Decimal,
    pub result: BetResult,
    pub win_amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub game_data: BetData,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bet {} game #{} stake {:.2} → {} x{} = {:.2}",
            self.id, self.game_id, self.amount, self.result, self.multiplier, self.win_amount,
        )
    }
}

impl Bet {
    /// Contribution to the daily loss total (negative when the bet won).
    pub fn net_loss(&self) -> Decimal {
        self.amount - self.win_amount
    }
}

// ---------------------------------------------------------------------------
// Payouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Rejected)
    }

    /// The workflow: Pending → Processing → {Completed, Rejected}; a pending
    /// request may also be rejected outright.
    pub fn can_transition_to(&self, next: PayoutStatus) -> bool {
        matches!(
            (self, next),
            (PayoutStatus::Pending, PayoutStatus::Processing)
                | (PayoutStatus::Pending, PayoutStatus::Rejected)
                | (PayoutStatus::Processing, PayoutStatus::Completed)
                | (PayoutStatus::Processing, PayoutStatus::Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "completed" => Ok(PayoutStatus::Completed),
            "rejected" => Ok(PayoutStatus::Rejected),
            other => Err(LedgerError::Storage(format!("unknown payout status: {other}"))),
        }
    }
}

/// Where a withdrawal should be sent. Which fields matter depends on the
/// payment method; the engine stores them verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_holder: Option<String>,
    pub account_number: Option<String>,
    pub bank_name: Option<String>,
    pub iban: Option<String>,
    pub email: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Gross amount reserved from the balance.
    pub amount: Decimal,
    pub method: String,
    pub status: PayoutStatus,
    pub fee: Decimal,
    /// What actually leaves the platform: `amount - fee`.
    pub net_amount: Decimal,
    pub account_details: AccountDetails,
    pub request_date: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
}

impl fmt::Display for Payout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "payout {} {:.2} via {} (fee {:.2}, net {:.2}) [{}]",
            self.id, self.amount, self.method, self.fee, self.net_amount, self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// One page of a newest-first listing. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, per_page: u32) -> Self {
        let per_page = per_page.max(1);
        let pages = ((total + per_page as u64 - 1) / per_page as u64) as u32;
        Self {
            items,
            total,
            page: page.max(1),
            per_page,
            pages,
        }
    }

    /// Slice an already-ordered list.
    pub fn from_sorted(all: Vec<T>, page: u32, per_page: u32) -> Self {
        let total = all.len() as u64;
        let per_page = per_page.max(1);
        let offset = (page.max(1) as usize - 1) * per_page as usize;
        let items = all.into_iter().skip(offset).take(per_page as usize).collect();
        Self::new(items, total, page, per_page)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; rejected before any mutation.
    Validation,
    /// Request is well-formed but a limit or rule forbids it.
    Policy,
    /// Concurrent write detected; safe to retry.
    Consistency,
    /// Persistence unavailable; nothing was written.
    Storage,
}

/// Domain-specific error types for the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // -- Validation --
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Unknown user: {0}")]
    UnknownUser(Uuid),

    #[error("Unknown game: {0}")]
    UnknownGame(GameId),

    #[error("Unknown payment method: {0}")]
    UnknownMethod(String),

    #[error("Unknown payout: {0}")]
    UnknownPayout(Uuid),

    #[error("Amount {amount:.2} outside allowed range [{min:.2}, {max:.2}]")]
    AmountOutOfRange { amount: Decimal, min: Decimal, max: Decimal },

    #[error("Invalid self-exclusion period: {0} days")]
    InvalidExclusionPeriod(u32),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    // -- Policy --
    #[error("Game {game_id} is unavailable: {reason}")]
    GameUnavailable { game_id: GameId, reason: String },

    #[error("Bet {amount:.2} outside table limits [{min:.2}, {max:.2}]")]
    BetOutOfRange { amount: Decimal, min: Decimal, max: Decimal },

    #[error("Bet {amount:.2} exceeds personal bet limit {limit:.2}")]
    PersonalLimitExceeded { amount: Decimal, limit: Decimal },

    #[error("Insufficient balance: need {needed:.2}, have {available:.2}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Daily loss limit exceeded: lost {lost_today:.2} today, bet {amount:.2}, limit {limit:.2}")]
    DailyLimitExceeded { lost_today: Decimal, amount: Decimal, limit: Decimal },

    #[error("Daily deposit limit exceeded: deposited {deposited_today:.2} today, limit {limit:.2}")]
    DailyDepositLimitExceeded { deposited_today: Decimal, limit: Decimal },

    #[error("Daily withdrawal limit exceeded: withdrawn {withdrawn_today:.2} today, limit {limit:.2}")]
    DailyWithdrawalLimitExceeded { withdrawn_today: Decimal, limit: Decimal },

    #[error("Minimum withdrawal amount is {minimum:.2}, requested {amount:.2}")]
    BelowMinimumWithdrawal { amount: Decimal, minimum: Decimal },

    #[error("KYC verification required")]
    KycRequired,

    #[error("Account self-excluded until {until}")]
    AccountExcluded { until: DateTime<Utc> },

    #[error("Account {0} is closed")]
    AccountClosed(Uuid),

    #[error("Invalid payout transition for {payout_id}: {from} → {to}")]
    InvalidTransition { payout_id: Uuid, from: PayoutStatus, to: PayoutStatus },

    // -- Consistency --
    #[error("Concurrent write conflict: {0}")]
    Conflict(String),

    #[error("Ledger busy: gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    // -- Storage --
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::UnknownUser(_)
            | LedgerError::UnknownGame(_)
            | LedgerError::UnknownMethod(_)
            | LedgerError::UnknownPayout(_)
            | LedgerError::AmountOutOfRange { .. }
            | LedgerError::InvalidExclusionPeriod(_)
            | LedgerError::DuplicateUsername(_) => ErrorKind::Validation,

            LedgerError::GameUnavailable { .. }
            | LedgerError::BetOutOfRange { .. }
            | LedgerError::PersonalLimitExceeded { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::DailyLimitExceeded { .. }
            | LedgerError::DailyDepositLimitExceeded { .. }
            | LedgerError::DailyWithdrawalLimitExceeded { .. }
            | LedgerError::BelowMinimumWithdrawal { .. }
            | LedgerError::KycRequired
            | LedgerError::AccountExcluded { .. }
            | LedgerError::AccountClosed(_)
            | LedgerError::InvalidTransition { .. } => ErrorKind::Policy,

            LedgerError::Conflict(_) | LedgerError::RetriesExhausted { .. } => {
                ErrorKind::Consistency
            }

            LedgerError::Storage(_) | LedgerError::Database(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller may simply try again later.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Consistency
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
